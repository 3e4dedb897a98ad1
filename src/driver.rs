pub mod socs;
pub mod timer;
