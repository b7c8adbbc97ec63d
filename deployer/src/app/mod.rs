//! Host application: wiring, console and run loop

pub mod console;
pub mod options;
pub mod run;
