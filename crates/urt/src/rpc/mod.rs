// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote procedure calls between threads.
//!
//! A caller fills a pre-allocated [`Request`] and submits it to a
//! [`Service`]. The service thread is signalled, dispatches the request,
//! writes the response into the same buffer and responds, which signals the
//! caller. HRT requests overtake all other requests in the service queue.
//!
//! # Example
//!
//! ```
//! use urt::rpc::{Request, RetrievePolicy, Service};
//! use urt::{Core, ThreadEvents};
//!
//! let core = Core::new(None);
//! let service = Service::new(&core, 1, ThreadEvents::current(), 1 << 1).unwrap();
//!
//! // caller
//! let request = Request::nrt(8);
//! let mut guard = request.acquire().unwrap();
//! guard.payload_mut()[..2].copy_from_slice(&[20, 22]);
//! guard.submit(&service, 2, 1 << 2, 0);
//!
//! // service
//! let mut args = [0u8; 8];
//! let dispatched = service.dispatch(&mut args).unwrap();
//! let mut call = service.acquire_request(&dispatched).unwrap();
//! call.payload_mut()[0] = args[0] + args[1];
//! call.respond(1);
//!
//! // caller
//! let mut result = [0u8; 1];
//! let retrieved = request.retrieve(RetrievePolicy::Lazy, &mut result).unwrap();
//! assert_eq!((retrieved.size, result[0]), (1, 42));
//! ```

mod request;
mod service;

pub use request::{Request, RequestGuard, RequestProfile, RetrievePolicy, Retrieved};
pub use service::{Dispatched, QueueLength, Service, ServiceProfile, ServiceRequestGuard};
