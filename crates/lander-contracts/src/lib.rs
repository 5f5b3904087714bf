pub mod catalog;
pub mod events;
pub mod filenames;
pub mod providers;
pub mod runs;
pub mod settings;
pub mod slots;
