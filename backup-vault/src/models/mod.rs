pub mod backup_record;
pub mod log_entry;
pub mod settings;
