//! Media Store Service
//!
//! Backend of the short-video feed. Lists and accepts uploaded videos over
//! HTTP, keeps them in S3-compatible object storage, and generates a
//! single-frame thumbnail for every new video.
//!
//! ## Features
//!
//! - **Video listing**: `GET /api/listVideos` returns `{name, url}` for every
//!   object in the videos collection
//! - **Uploads**: `POST /api/uploadVideo` takes a multipart `video` field or a
//!   raw body and stores it under a generated name
//! - **Thumbnails**: an ffmpeg-backed worker writes `<name>-thumb.png` into the
//!   thumbnails collection, fed by upload notifications and a polling watcher
//!
//! ## Architecture
//!
//! ```text
//!  Feed client                                   Object store
//! ┌──────────────┐        ┌──────────────┐      ┌──────────────┐
//! │ listVideos   │───────▶│ HTTP API     │─────▶│ videos/      │
//! │ uploadVideo  │        └──────────────┘      │ thumbnails/  │
//! └──────────────┘               │              └──────────────┘
//!                                ▼                 ▲      │
//!                         ┌──────────────┐         │      │
//!                         │ Thumbnail    │─────────┘      │
//!                         │ Worker       │◀───────┐       │
//!                         └──────────────┘        │       ▼
//!                                          ┌──────────────┐
//!                                          │ Video        │
//!                                          │ Watcher      │
//!                                          └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod store;
pub mod thumbnail;
pub mod watcher;

pub use api::{create_router, AppState, UploadError, UploadResponse, VideoEntry};
pub use config::Config;
pub use store::{BlobStore, MemoryBlobStore, PutOptions, S3BlobStore, StoreError, StoredObject};
pub use thumbnail::{
    FfmpegExtractor, FrameExtractor, ThumbnailError, ThumbnailGenerator, ThumbnailWorker,
    VideoStored,
};
pub use watcher::VideoWatcher;
