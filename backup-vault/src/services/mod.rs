pub mod clamav;
pub mod db_backup;
