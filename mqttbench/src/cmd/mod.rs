pub mod payload;
pub mod run;
