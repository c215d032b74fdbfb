pub mod layout;
pub mod lock;
pub mod releases;
pub mod settings;
pub mod state;
