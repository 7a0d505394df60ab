pub mod browser;
pub mod configuration;
pub mod download;
pub mod run;
pub mod site;
