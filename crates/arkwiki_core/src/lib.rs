pub mod cache;
pub mod config;
pub mod edit;
pub mod items;
pub mod page;
pub mod query;
pub mod run;
pub mod session;
pub mod template;
