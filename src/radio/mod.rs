pub mod bluez;
pub mod traits;

pub use bluez::{BluezConfig, BluezRadio};
pub use traits::{RadioEventSender, RadioStack};
