//! Heap and map options.
//!
//! Every option has a type, a validator and a default. An option can be set from a string by
//! [`Options::set_from_str`], in bulk by [`Options::set_bulk_from_str`], or from environment
//! variables named `GENHEAP_<OPTION>` (for example `GENHEAP_EDEN_SIZE=1048576`) by
//! [`Options::read_env_var_settings`]. Invalid values are rejected with a warning and the old
//! value is kept.

use crate::util::constants::*;

/// The prefix of environment variables that set options.
pub const ENV_VAR_PREFIX: &str = "GENHEAP_";

fn is_positive(v: &usize) -> bool {
    *v > 0
}

fn is_power_of_two(v: &usize) -> bool {
    v.is_power_of_two()
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        #[derive(Clone, Debug, PartialEq)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }

        impl Options {
            /// Set an option from its name and a string value. Returns `false` and keeps the
            /// current value if the name is unknown, or the value cannot be parsed or is invalid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value to the right type
                    $(stringify!($name) => if let Ok(val) = val.parse::<$type>() {
                        let validate_fn = $validator;
                        let is_valid = validate_fn(&val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val;
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. The old value will be kept.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Can't parse value. The old value will be kept.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {:?}", s);
                        false
                    }
                }
            }

            /// Set options from environment variables that start with [`ENV_VAR_PREFIX`] and name
            /// an option. Other variables are ignored.
            pub fn read_env_var_settings(&mut self) {
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_VAR_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => {
                                self.set_from_str(lowercase, &val);
                            },)*
                            _ => {}
                        }
                    }
                }
            }
        }

        impl Default for Options {
            fn default() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
    ]
}

options! {
    /// The size of Eden in bytes.
    eden_size:             usize [is_positive] = DEFAULT_EDEN_SIZE,
    /// The size of each survivor space in bytes.
    survivor_size:         usize [is_positive] = DEFAULT_SURVIVOR_SIZE,
    /// The size of the old space in bytes.
    old_size:              usize [is_positive] = DEFAULT_OLD_SIZE,
    /// An object is promoted by the young collection that would make its age reach this value.
    tenuring_threshold:    usize [|v: &usize| (1..=MAX_TENURING_THRESHOLD).contains(v)] = DEFAULT_TENURING_THRESHOLD,
    /// The number of buckets of the first table of the object table.
    map_initial_capacity:  usize [is_power_of_two] = DEFAULT_MAP_CAPACITY,
    map_load_factor:       f64   [|v: &f64| v.is_finite() && *v > 0.0] = DEFAULT_LOAD_FACTOR,
    treeify_threshold:     usize [|v: &usize| *v >= 2] = TREEIFY_THRESHOLD,
    untreeify_threshold:   usize [is_positive] = UNTREEIFY_THRESHOLD,
    min_treeify_capacity:  usize [is_power_of_two] = MIN_TREEIFY_CAPACITY,
}

impl Options {
    /// Set options from a string of whitespace-separated `name=value` pairs. Returns `true` only if
    /// every pair was valid. Valid pairs are applied even if other pairs are not.
    pub fn set_bulk_from_str(&mut self, options: &str) -> bool {
        let mut all_valid = true;
        for opt in options.split_ascii_whitespace() {
            let kv_pair: Vec<&str> = opt.split('=').collect();
            if kv_pair.len() != 2 {
                warn!("Malformed option {:?}. Expected name=value.", opt);
                all_valid = false;
                continue;
            }
            let key = kv_pair[0];
            let val = kv_pair[1];
            if !self.set_from_str(key, val) {
                all_valid = false;
            }
        }
        all_valid
    }
}
