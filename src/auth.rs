//! CMS authentication: password hashing, signed bearer tokens, the login
//! flow and the request extractor that verifies tokens.

pub mod login;
pub mod middleware;
pub mod models;
pub mod password;
pub mod token;
