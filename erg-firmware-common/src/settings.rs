use crate::config::RowerProfile;

/// Persisted-settings collaborator: supplies the rower profile at startup.
/// The engine never persists anything itself; how the store keeps the
/// profile (flash, EEPROM, a host file) is its own business.
pub trait ProfileStore {
    #[cfg(feature = "defmt")]
    type Error: defmt::Format + core::fmt::Debug;
    #[cfg(not(feature = "defmt"))]
    type Error: core::fmt::Debug;

    fn load_profile(&mut self) -> Result<RowerProfile, Self::Error>;
}

/// A store with a fixed in-memory profile, for bring-up and tests.
pub struct StaticProfileStore(pub RowerProfile);

impl ProfileStore for StaticProfileStore {
    type Error = core::convert::Infallible;

    fn load_profile(&mut self) -> Result<RowerProfile, Self::Error> {
        Ok(self.0.clone())
    }
}
