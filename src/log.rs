//! Logging interface, contingent on the `defmt-03` and `log` features
//!
//! Without either feature, every statement compiles away. Don't enable a
//! backend that logs over the same USB interface that the engine streams on.

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::debug!($($args)*);
        #[cfg(feature = "log")]
        ::log::debug!($($args)*);
    };
}

macro_rules! info {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::info!($($args)*);
        #[cfg(feature = "log")]
        ::log::info!($($args)*);
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::warn!($($args)*);
        #[cfg(feature = "log")]
        ::log::warn!($($args)*);
    };
}

macro_rules! error {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::error!($($args)*);
        #[cfg(feature = "log")]
        ::log::error!($($args)*);
    };
}
