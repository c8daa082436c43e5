//! Helper macro for small `#[repr(u8)]` enums that travel on the wire.

/// Declare a fieldless `u8` enum with stable numeric conversions.
///
/// Generates `as_u8`, `from_u8` and an `ALL` table in declaration order.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[repr(u8)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant = $value,
            )+
        }

        impl $name {
            /// Every variant, in wire order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Convert to the stable numeric representation.
            pub const fn as_u8(self) -> u8 {
                self as u8
            }

            /// Try to convert from the stable numeric representation.
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $(v if v == $value => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use wire_enum;
