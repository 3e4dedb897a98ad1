#[cfg(feature = "nrf52840")]
pub mod nrf;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
