//! # Docsync Web-App
//!
//! A small typed component model over `web-app` deployment descriptors,
//! built on the generic sync engine.
//!
//! ```text
//! ┌─────────────┐   text edits    ┌──────────────────────────┐
//! │ TextBuffer  │ ──────────────► │ DocumentModel            │
//! └─────────────┘ ◄────────────── │   <WebAppFactory>        │
//!                  flushed writes └────────────┬─────────────┘
//!                                              │ ComponentId
//!                                              ▼
//!                              WebApp / Servlet / ServletMapping
//!                              ResourceRef / InitParam handles
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsync_webapp::{WebApp, WebAppFactory, WebAppModel};
//!
//! let mut model = WebAppModel::from_text(text, WebAppFactory);
//! let app = WebApp::of(&mut model)?;
//! for servlet in app.servlets(&mut model)? {
//!     println!("{:?}", servlet.name(&model)?);
//! }
//! ```

mod components;
mod schema;

// Re-export main types
pub use components::{InitParam, ResourceRef, Servlet, ServletMapping, WebApp, WebAppModel};
pub use schema::{WebAppFactory, WebAppKind, NAMESPACE};
