// ABOUTME: Built-in responder modules.

pub mod controls;

pub use controls::ControlsModule;
