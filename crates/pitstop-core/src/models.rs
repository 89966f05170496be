//! Data models for Pitstop
//!
//! Defines the vehicle record (`Car`) and the ordered collection that owns
//! them (`Garage`). Both serialize to the JSON shape shared by the local
//! garage file, the write queue and the remote document store.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Longest nickname accepted when adding or editing a car
pub const MAX_NICKNAME_LEN: usize = 25;

/// Prefix every inline photo carries
const INLINE_PHOTO_PREFIX: &str = "data:image";

/// Errors raised by garage edits
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GarageError {
    /// Nickname exceeds [`MAX_NICKNAME_LEN`] characters
    #[error(
        "Nickname too long ({len} characters, max {max}). Please abbreviate.",
        max = MAX_NICKNAME_LEN
    )]
    NicknameTooLong { len: usize },

    /// Another car already uses the same brand, model and nickname
    #[error("A {brand} {model} nicknamed '{nickname}' is already in the garage")]
    Duplicate {
        brand: String,
        model: String,
        nickname: String,
    },

    /// No car at the requested position
    #[error("No car at position {index} (garage has {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A string that is not an inline image
#[derive(Debug, Error)]
#[error("not an inline image (expected a data:image URL)")]
pub struct InvalidPhoto;

/// An inline-encoded image (`data:image/...;base64,...`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Photo(String);

impl Photo {
    /// Encode raw image bytes as an inline photo
    pub fn from_bytes(content_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{};base64,{}", content_type, STANDARD.encode(bytes)))
    }

    /// Rebuild a photo from a blob previously produced by [`Photo::as_bytes`]
    pub fn from_blob(blob: Vec<u8>) -> Option<Self> {
        String::from_utf8(blob).ok().and_then(|s| Self::try_from(s).ok())
    }

    /// The data URL
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The data URL as bytes, the form stored in the image cache
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Declared content type, e.g. `image/jpeg`
    pub fn content_type(&self) -> Option<&str> {
        let header = self.0.strip_prefix("data:")?.split(',').next()?;
        header.split(';').next().filter(|t| !t.is_empty())
    }

    /// Decode the base64 payload back into image bytes
    pub fn decode(&self) -> Option<Vec<u8>> {
        let (header, payload) = self.0.split_once(',')?;
        if !header.ends_with(";base64") {
            return None;
        }
        STANDARD.decode(payload).ok()
    }
}

impl TryFrom<String> for Photo {
    type Error = InvalidPhoto;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.starts_with(INLINE_PHOTO_PREFIX) {
            Ok(Self(value))
        } else {
            Err(InvalidPhoto)
        }
    }
}

impl From<Photo> for String {
    fn from(photo: Photo) -> Self {
        photo.0
    }
}

/// Where a car's picture lives: inline, or in the image cache
///
/// Being an enum, a car can never carry both at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CarImage {
    /// Inline photo, as sent to the remote store
    Inline { photo: Photo },
    /// Key into the image cache, as persisted locally
    Cached {
        #[serde(rename = "imageRef", alias = "imgId")]
        image_ref: String,
    },
}

/// Last known parking position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// A vehicle entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, alias = "nick")]
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
    #[serde(flatten)]
    pub image: Option<CarImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Car {
    /// Create a car with no plate, picture or location
    pub fn new(
        brand: impl Into<String>,
        model: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            brand: brand.into(),
            model: model.into(),
            nickname: nickname.into(),
            plate: None,
            image: None,
            location: None,
        }
    }

    pub fn with_plate(mut self, plate: impl Into<String>) -> Self {
        self.plate = Some(plate.into());
        self
    }

    pub fn with_photo(mut self, photo: Photo) -> Self {
        self.set_photo(photo);
        self
    }

    pub fn with_location(mut self, lat: f64, lng: f64) -> Self {
        self.location = Some(Location { lat, lng });
        self
    }

    /// Inline photo, if the picture is not in the cache
    pub fn photo(&self) -> Option<&Photo> {
        match &self.image {
            Some(CarImage::Inline { photo }) => Some(photo),
            _ => None,
        }
    }

    /// Image cache key, if the picture lives in the cache
    pub fn image_ref(&self) -> Option<&str> {
        match &self.image {
            Some(CarImage::Cached { image_ref }) => Some(image_ref),
            _ => None,
        }
    }

    /// Replace the picture with an inline photo (drops any cache reference)
    pub fn set_photo(&mut self, photo: Photo) {
        self.image = Some(CarImage::Inline { photo });
    }

    /// Point the picture at an image cache entry (drops any inline photo)
    pub fn set_image_ref(&mut self, image_ref: impl Into<String>) {
        self.image = Some(CarImage::Cached {
            image_ref: image_ref.into(),
        });
    }

    pub fn clear_image(&mut self) {
        self.image = None;
    }

    /// Same brand, model and nickname
    pub fn is_duplicate_of(&self, other: &Car) -> bool {
        self.brand == other.brand && self.model == other.model && self.nickname == other.nickname
    }

    fn validate_nickname(&self) -> Result<(), GarageError> {
        let len = self.nickname.chars().count();
        if len > MAX_NICKNAME_LEN {
            return Err(GarageError::NicknameTooLong { len });
        }
        Ok(())
    }
}

/// The ordered collection of cars owned by one user
///
/// Serialized as a JSON array. A single bare object (written by older
/// versions) is read back as a one-car garage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Garage {
    cars: Vec<Car>,
}

impl Garage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    pub fn cars(&self) -> &[Car] {
        &self.cars
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Car> {
        self.cars.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Car> {
        self.cars.get(index)
    }

    pub fn into_cars(self) -> Vec<Car> {
        self.cars
    }

    /// Append a car, enforcing the nickname rules
    pub fn add(&mut self, car: Car) -> Result<(), GarageError> {
        car.validate_nickname()?;
        self.check_duplicate(&car, None)?;
        self.cars.push(car);
        Ok(())
    }

    /// Edit the car at `index` in place
    ///
    /// The edit is applied to a copy and only committed if the result still
    /// passes the nickname rules.
    pub fn update<F>(&mut self, index: usize, edit: F) -> Result<(), GarageError>
    where
        F: FnOnce(&mut Car),
    {
        let mut car = self.get(index).cloned().ok_or(GarageError::IndexOutOfRange {
            index,
            len: self.len(),
        })?;
        edit(&mut car);
        car.validate_nickname()?;
        self.check_duplicate(&car, Some(index))?;
        self.cars[index] = car;
        Ok(())
    }

    /// Remove and return the car at `index`
    pub fn remove(&mut self, index: usize) -> Result<Car, GarageError> {
        if index >= self.len() {
            return Err(GarageError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(self.cars.remove(index))
    }

    /// Put a removed car back at its old position (undo)
    ///
    /// Positions past the end append.
    pub fn restore(&mut self, index: usize, car: Car) {
        let index = index.min(self.len());
        self.cars.insert(index, car);
    }

    /// Image cache keys referenced by this garage
    pub fn image_refs(&self) -> impl Iterator<Item = &str> {
        self.cars.iter().filter_map(Car::image_ref)
    }

    fn check_duplicate(&self, car: &Car, skip: Option<usize>) -> Result<(), GarageError> {
        let duplicate = self
            .cars
            .iter()
            .enumerate()
            .any(|(i, other)| Some(i) != skip && other.is_duplicate_of(car));
        if duplicate {
            return Err(GarageError::Duplicate {
                brand: car.brand.clone(),
                model: car.model.clone(),
                nickname: car.nickname.clone(),
            });
        }
        Ok(())
    }
}

impl From<Vec<Car>> for Garage {
    fn from(cars: Vec<Car>) -> Self {
        Self { cars }
    }
}

impl FromIterator<Car> for Garage {
    fn from_iter<I: IntoIterator<Item = Car>>(iter: I) -> Self {
        Self {
            cars: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Garage {
    type Item = &'a Car;
    type IntoIter = std::slice::Iter<'a, Car>;

    fn into_iter(self) -> Self::IntoIter {
        self.cars.iter()
    }
}

impl<'de> Deserialize<'de> for Garage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            Many(Vec<Car>),
            One(Box<Car>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::Many(cars) => Self { cars },
            OneOrMany::One(car) => Self { cars: vec![*car] },
        })
    }
}
