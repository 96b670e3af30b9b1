//! Enumerated vehicle attributes
//!
//! Each enumeration has a fixed set of canonical string values. They are the
//! only spellings accepted by serialization and by the mapping tables of the
//! selector document.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fuel type of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Flex,
    Gasoline,
    Ethanol,
    Diesel,
    Electric,
    Hybrid,
    Cng,
}

impl FuelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flex => "flex",
            Self::Gasoline => "gasoline",
            Self::Ethanol => "ethanol",
            Self::Diesel => "diesel",
            Self::Electric => "electric",
            Self::Hybrid => "hybrid",
            Self::Cng => "cng",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::Flex,
            Self::Gasoline,
            Self::Ethanol,
            Self::Diesel,
            Self::Electric,
            Self::Hybrid,
            Self::Cng,
        ]
    }
}

/// Transmission type of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transmission {
    Manual,
    Automatic,
    Automated,
    Cvt,
}

impl Transmission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Automated => "automated",
            Self::Cvt => "cvt",
        }
    }

    pub fn all() -> &'static [Self] {
        &[Self::Manual, Self::Automatic, Self::Automated, Self::Cvt]
    }
}

/// Body category of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Hatch,
    Sedan,
    Suv,
    Pickup,
    Van,
    Coupe,
    Convertible,
    Wagon,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hatch => "hatch",
            Self::Sedan => "sedan",
            Self::Suv => "suv",
            Self::Pickup => "pickup",
            Self::Van => "van",
            Self::Coupe => "coupe",
            Self::Convertible => "convertible",
            Self::Wagon => "wagon",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::Hatch,
            Self::Sedan,
            Self::Suv,
            Self::Pickup,
            Self::Van,
            Self::Coupe,
            Self::Convertible,
            Self::Wagon,
        ]
    }
}

/// Error returned when a string is not one of the canonical values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! canonical_enum {
    ($ty:ty, $kind:literal) => {
        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_lowercase();
                <$ty>::all()
                    .iter()
                    .copied()
                    .find(|variant| variant.as_str() == wanted)
                    .ok_or_else(|| UnknownVariant {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

canonical_enum!(FuelType, "fuel type");
canonical_enum!(Transmission, "transmission");
canonical_enum!(Category, "category");
