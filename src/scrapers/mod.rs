pub mod browser;
pub mod naver;
pub mod traits;
pub mod types;

pub use browser::{ChromeSession, NaverDetailSource, NaverMapSurface};
pub use traits::{DetailSource, MapSurface, ResultSink};
