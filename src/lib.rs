//! Client side of a networked digital-signage display.
//!
//! A device running this crate registers with a content management server
//! over a websocket, keeps the session alive with heartbeats, and plays the
//! playlist the server assigns to it: web pages, images, video, audio and
//! live streams, each for its planned duration.
//!
//! * [`remote`] manages the server session and turns frames into [`events`]
//! * [`player`] schedules playback and recovers from media failures
//! * [`cache`] tracks which content has been fetched ahead of time
//! * [`controller`] owns all three and drives their timers
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod player;
pub mod protocol;
pub mod remote;
pub mod settings;
pub mod signal;
pub mod surface;
pub mod timer;
pub mod transport;
