pub mod post_service;
pub mod vote_service;
