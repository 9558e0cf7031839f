//! Concrete [`super::ProviderResolver`] implementations, one per provider
//! discriminator.

pub mod git;
pub mod http;
pub mod inline;
pub mod k8s_secret;
pub mod oci;
