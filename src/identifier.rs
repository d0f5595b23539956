//! Stable identifiers for centrals, peripherals, and remote-peripheral proxies.
//!
//! Every central, every peripheral, and every remote-peripheral proxy carries a stable
//! UUID generated at construction; a remote-peripheral proxy's identifier always equals the
//! identifier of the peripheral façade it represents. Modeled as a thin newtype the way a
//! MAC address gets wrapped in `BDAddr`: `Copy`, ordered, hashable, and `Display`/`FromStr`
//! for debug logging and test fixtures.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use uuid::Uuid;

macro_rules! uuid_identifier {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh, process-unique identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

uuid_identifier!(CentralId, "Identifier of a central façade.");
uuid_identifier!(
    PeripheralId,
    "Identifier of a peripheral façade, and of the remote-peripheral proxy that represents it."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_stable_and_unique() {
        let a = PeripheralId::new();
        let b = PeripheralId::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn roundtrips_through_string() {
        let id = CentralId::new();
        let parsed: CentralId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
