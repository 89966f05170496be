//! Garage command handlers

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

use pitstop_core::{Car, GarageRepository, Location, Photo, RepositoryError};

use crate::output::Output;

/// Fields for a new or edited car
#[derive(Debug, Default)]
pub struct CarFields {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub nickname: Option<String>,
    pub plate: Option<String>,
    pub photo: Option<PathBuf>,
    pub clear_photo: bool,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// List the garage
///
/// `local` skips the remote and shows only what is on this device.
pub async fn list(repo: &GarageRepository, local: bool, output: &Output) -> Result<()> {
    let garage = if local {
        repo.load_local()
    } else {
        repo.load().await
    };
    output.print_garage(&garage);
    Ok(())
}

/// Show a single car
pub async fn show(repo: &GarageRepository, position: usize, output: &Output) -> Result<()> {
    let garage = repo.load_local();
    let index = to_index(position, garage.len())?;
    let car = repo.rehydrate_images(&garage).into_cars().swap_remove(index);
    output.print_car(position, &car);
    Ok(())
}

/// Add a car
pub async fn add(
    repo: &GarageRepository,
    brand: String,
    model: String,
    nickname: String,
    fields: CarFields,
    output: &Output,
) -> Result<()> {
    let edit = CarEdit::prepare(fields)?;
    let mut car = Car::new(brand.trim(), model.trim(), nickname.trim());
    edit.apply(&mut car);

    let mut garage = repo.load_local();
    repo.add_car(&mut garage, car)
        .await
        .map_err(user_error)?;

    output.success(&format!("Added car #{}", garage.len()));
    if let Some(car) = garage.cars().last() {
        output.print_car(garage.len(), car);
    }
    Ok(())
}

/// Edit the car at a 1-based position
pub async fn edit(
    repo: &GarageRepository,
    position: usize,
    fields: CarFields,
    output: &Output,
) -> Result<()> {
    let mut garage = repo.load_local();
    let index = to_index(position, garage.len())?;

    let edit = CarEdit::prepare(fields)?;
    repo.update_car(&mut garage, index, |car| edit.apply(car))
        .await
        .map_err(user_error)?;

    output.success(&format!("Updated car #{}", position));
    if let Some(car) = garage.get(index) {
        output.print_car(position, car);
    }
    Ok(())
}

/// Remove the car at a 1-based position
pub async fn remove(repo: &GarageRepository, position: usize, output: &Output) -> Result<()> {
    let mut garage = repo.load_local();
    let index = to_index(position, garage.len())?;

    let removed = repo
        .remove_car(&mut garage, index)
        .await
        .map_err(user_error)?;

    output.success(&format!(
        "Removed {} {} '{}'",
        removed.brand, removed.model, removed.nickname
    ));
    Ok(())
}

/// Validated edits, ready to apply to a car
#[derive(Debug, Default)]
struct CarEdit {
    brand: Option<String>,
    model: Option<String>,
    nickname: Option<String>,
    plate: Option<Option<String>>,
    photo: Option<Photo>,
    clear_photo: bool,
    location: Option<(f64, f64)>,
}

impl CarEdit {
    /// Check the fields and read any photo file
    fn prepare(fields: CarFields) -> Result<Self> {
        let location = match (fields.lat, fields.lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            (None, None) => None,
            _ => bail!("Both --lat and --lng are required to set a location"),
        };
        let photo = fields.photo.as_deref().map(read_photo).transpose()?;
        let plate = fields.plate.map(|plate| {
            let plate = plate.trim().to_uppercase();
            (!plate.is_empty()).then_some(plate)
        });

        Ok(Self {
            brand: fields.brand.map(|s| s.trim().to_string()),
            model: fields.model.map(|s| s.trim().to_string()),
            nickname: fields.nickname.map(|s| s.trim().to_string()),
            plate,
            photo,
            clear_photo: fields.clear_photo,
            location,
        })
    }

    fn apply(self, car: &mut Car) {
        if let Some(brand) = self.brand {
            car.brand = brand;
        }
        if let Some(model) = self.model {
            car.model = model;
        }
        if let Some(nickname) = self.nickname {
            car.nickname = nickname;
        }
        if let Some(plate) = self.plate {
            car.plate = plate;
        }
        if self.clear_photo {
            car.clear_image();
        }
        if let Some(photo) = self.photo {
            car.set_photo(photo);
        }
        if let Some((lat, lng)) = self.location {
            car.location = Some(Location { lat, lng });
        }
    }
}

/// Read an image file into an inline photo
fn read_photo(path: &Path) -> Result<Photo> {
    let content_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => bail!(
            "Unsupported image type: {} (use jpg, png, webp or gif)",
            path.display()
        ),
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read photo {}", path.display()))?;
    Ok(Photo::from_bytes(content_type, &bytes))
}

/// Convert a 1-based position into an index
fn to_index(position: usize, len: usize) -> Result<usize> {
    if position == 0 || position > len {
        bail!("No car at position {} (garage has {})", position, len);
    }
    Ok(position - 1)
}

fn user_error(e: RepositoryError) -> anyhow::Error {
    anyhow!(e.user_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_to_index() {
        assert_eq!(to_index(1, 3).unwrap(), 0);
        assert_eq!(to_index(3, 3).unwrap(), 2);
        assert!(to_index(0, 3).is_err());
        assert!(to_index(4, 3).is_err());
    }

    #[test]
    fn test_read_photo() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("car.JPG");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF]).unwrap();

        let photo = read_photo(&path).unwrap();
        assert_eq!(photo.content_type(), Some("image/jpeg"));
        assert_eq!(photo.decode().unwrap(), vec![0xFF, 0xD8, 0xFF]);

        assert!(read_photo(&temp_dir.path().join("car.bmp")).is_err());
    }

    #[test]
    fn test_car_edit() {
        let mut car = Car::new("Fiat", "Uno", "Escada");
        CarEdit::prepare(CarFields {
            nickname: Some(" Bala ".to_string()),
            plate: Some("abc-1234".to_string()),
            lat: Some(-23.5),
            lng: Some(-46.6),
            ..Default::default()
        })
        .unwrap()
        .apply(&mut car);

        assert_eq!(car.nickname, "Bala");
        assert_eq!(car.brand, "Fiat");
        assert_eq!(car.plate.as_deref(), Some("ABC-1234"));
        assert_eq!(car.location, Some(Location { lat: -23.5, lng: -46.6 }));

        CarEdit::prepare(CarFields {
            plate: Some(String::new()),
            ..Default::default()
        })
        .unwrap()
        .apply(&mut car);
        assert!(car.plate.is_none());
    }

    #[test]
    fn test_car_edit_requires_both_coordinates() {
        let result = CarEdit::prepare(CarFields {
            lat: Some(1.0),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_car_edit_rejects_missing_photo() {
        let result = CarEdit::prepare(CarFields {
            photo: Some("/nonexistent/car.jpg".into()),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
