pub mod correlation;
pub mod evidence;
pub mod intake;
pub mod order_code;
pub mod status;
