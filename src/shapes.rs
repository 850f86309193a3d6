pub mod rect;

pub use rect::FaceBox;
