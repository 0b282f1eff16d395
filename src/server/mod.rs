// Local control surface for a web-based front end.

pub mod handler;
