mod profile;

pub use profile::{ProfileError, SyncProfile};
