mod common;

mod api_tests;
mod provider_tests;
mod retry_tests;
