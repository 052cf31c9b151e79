mod client_tests;
mod events_tests;
mod receiver_tests;
