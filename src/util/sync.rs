pub mod seq_lock;
