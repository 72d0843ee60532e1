pub mod init;
pub mod release_id;
pub mod run;
pub mod simulate;
