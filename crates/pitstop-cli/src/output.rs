//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use pitstop_core::{Car, CarImage, Garage};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single car with its 1-based position
    pub fn print_car(&self, position: usize, car: &Car) {
        match self.format {
            OutputFormat::Human => {
                println!("Position: {}", position);
                println!("Brand:    {}", car.brand);
                println!("Model:    {}", car.model);
                println!("Nickname: {}", car.nickname);
                if let Some(ref plate) = car.plate {
                    println!("Plate:    {}", plate);
                }
                println!("Photo:    {}", image_label(car));
                if let Some(ref loc) = car.location {
                    println!("Location: {:.5}, {:.5}", loc.lat, loc.lng);
                }
            }
            OutputFormat::Json => print_json(car),
            OutputFormat::Quiet => println!("{}", position),
        }
    }

    /// Print the whole garage
    pub fn print_garage(&self, garage: &Garage) {
        match self.format {
            OutputFormat::Human => {
                if garage.is_empty() {
                    println!("Garage is empty.");
                    return;
                }
                for (i, car) in garage.iter().enumerate() {
                    println!(
                        "{:>3} | {} | {} | {} | {}",
                        i + 1,
                        truncate(&format!("{} {}", car.brand, car.model), 30),
                        truncate(&car.nickname, 25),
                        car.plate.as_deref().unwrap_or("-"),
                        image_label(car)
                    );
                }
                println!("\n{} car(s)", garage.len());
            }
            OutputFormat::Json => print_json(garage),
            OutputFormat::Quiet => {
                for car in garage {
                    println!("{}", car.nickname);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr (suppressed in quiet mode)
    pub fn warning(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", message);
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Could not encode output: {}", e),
    }
}

fn image_label(car: &Car) -> &'static str {
    match car.image {
        Some(CarImage::Inline { .. }) => "inline",
        Some(CarImage::Cached { .. }) => "cached",
        None => "-",
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitstop_core::Photo;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("Fusca Azulão do Vovô", 10), "Fusca A...");
    }

    #[test]
    fn test_image_label() {
        let mut car = Car::new("Fiat", "Uno", "Escada");
        assert_eq!(image_label(&car), "-");

        car.set_photo(Photo::from_bytes("image/png", &[1, 2, 3]));
        assert_eq!(image_label(&car), "inline");

        car.set_image_ref("img_1_abc");
        assert_eq!(image_label(&car), "cached");
    }
}
