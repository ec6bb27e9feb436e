// ── Profile state ──

pub mod profile_store;
pub mod profiles_file;

pub use profile_store::{ProfileStore, ProfileStoreState};
pub use profiles_file::{ProfileSource, ProfilesFile};
