pub mod config;
pub mod domain;
pub mod ldap;
pub mod mqtt;
