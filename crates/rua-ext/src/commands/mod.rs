pub mod check;
pub mod installed;
pub mod pack;
pub mod url;
pub mod validate;
