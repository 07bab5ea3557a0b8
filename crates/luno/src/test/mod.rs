// Test module organization
pub mod test_arith;
pub mod test_call;
pub mod test_coroutine;
pub mod test_gc;
pub mod test_stack;
pub mod test_string;
pub mod test_userdata;
