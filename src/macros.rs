//! Declarative macros backing the tagged enumerations and error-code table
//! used throughout the crate.

/// Declares a set of `u32` error-code constants plus a `get_error_message`
/// lookup function, in the TinyTuya-compatible style used by [`crate::error`].
macro_rules! define_error_codes {
    ( $( $name:ident = $code:expr => $msg:expr ),+ $(,)? ) => {
        $(
            #[allow(dead_code)]
            pub const $name: u32 = $code;
        )+

        /// Returns the human-readable message for a known error code, or a
        /// generic fallback for an unrecognised one.
        pub fn get_error_message(code: u32) -> &'static str {
            match code {
                $( $code => $msg, )+
                _ => "Unknown error",
            }
        }
    };
}

/// Declares the Tuya command-code enum: a tagged `u32` enumeration with a
/// fallible `from_u32` lookup.
macro_rules! define_command_type {
    ( $( $name:ident = $code:expr ),+ $(,)? ) => {
        /// A Tuya protocol command code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum CommandType {
            $( $name = $code, )+
        }

        impl CommandType {
            /// Looks up a command type by its wire code. Returns `None` for
            /// an unrecognised code ("unknown command", per spec).
            pub fn from_u32(code: u32) -> Option<Self> {
                match code {
                    $( $code => Some(CommandType::$name), )+
                    _ => None,
                }
            }
        }
    };
}

/// Declares the protocol-version enum: a string/float-tagged enumeration
/// with `FromStr`, `as_str`, and `val` accessors.
macro_rules! define_version {
    ( $( $name:ident = ($s:expr, $val:expr) ),+ $(,)? ) => {
        /// A supported Tuya protocol version.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Version {
            $( $name, )+
        }

        impl Version {
            /// The 3-byte ASCII form used in the wire version header
            /// (e.g. `"3.3"`).
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Version::$name => $s, )+
                }
            }

            /// The numeric protocol version (e.g. `3.3`).
            pub fn val(&self) -> f32 {
                match self {
                    $( Version::$name => $val, )+
                }
            }
        }

        impl std::str::FromStr for Version {
            type Err = crate::error::TuyaError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $( $s => Ok(Version::$name), )+
                    _ => Err(crate::error::TuyaError::UnsupportedVersion(s.to_string())),
                }
            }
        }

        impl std::fmt::Display for Version {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
