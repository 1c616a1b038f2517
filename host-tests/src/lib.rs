//! Host-based scenario tests for the word clock lifecycle
//! These tests drive `Runtime` end to end against in-memory collaborators

#[cfg(test)]
mod rig;

#[cfg(test)]
mod fleet;
#[cfg(test)]
mod lifecycle;
#[cfg(test)]
mod ota;
#[cfg(test)]
mod provisioning;
