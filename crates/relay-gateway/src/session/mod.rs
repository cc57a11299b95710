//! Component G: Headless Session Controller (spec.md §4.G).

pub mod browser;
pub mod controller;
pub mod handshake;

pub use browser::{BrowserHandle, BrowserLauncher, WebDriverLauncher};
pub use controller::{SessionController, SessionHandle, SessionInfo};
pub use handshake::{HandshakeStore, MintedHandshake};
