//! Client-side session helpers

pub mod reconcile;

pub use reconcile::Reconciler;
