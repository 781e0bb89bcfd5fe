pub mod apple_music;
pub mod spotify;
pub mod transfer;
