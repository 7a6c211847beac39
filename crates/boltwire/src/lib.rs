//! Top-level facade crate for boltwire.
//!
//! Re-exports the protocol core and the remoting runtime so users can depend on a single crate.

pub mod core {
    pub use boltwire_core::*;
}

pub mod remoting {
    pub use boltwire_remoting::*;
}
