pub mod fields;
pub mod run;
pub mod validate;
