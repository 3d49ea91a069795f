//! jspy - Reactive debugger API over a JDI-style low-level facility
//!
//! Subscribing to a debug event kind returns a lazy, closable push-stream.
//! Under the hood the profile layer de-duplicates native requests through a
//! memoization cell, fans incoming events out to every live subscriber, and
//! tears a request down when its last subscriber closes.
//!
//! Architecture:
//! - `jdi`: the consumed low-level boundary (connection trait, raw events,
//!   native request handles) plus a scripted mock connection
//! - `arguments`: request-time vs dispatch-time argument model and the
//!   unique-id correlation value that exists in both forms
//! - `requests`: per-kind request managers over one generic core
//! - `events`: the event manager and its single dispatcher thread
//! - `pipeline`: closable push-streams connecting everything to user code
//! - `memo`: the memoization cell that makes requests shareable
//! - `profiles`: the user-facing `on_<kind>` subscription surface
//!
//! ```no_run
//! use jspy::jdi::mock::MockConnection;
//! use jspy::Profile;
//!
//! let connection = MockConnection::new();
//! let profile = Profile::new(connection);
//! let dispatcher = profile.spawn_dispatcher()?;
//!
//! let entries = profile.on_method_entry("com.example.Main", "run", vec![])?;
//! entries.for_each(|event| println!("entered: {event:?}"));
//!
//! // Closing the stream removes the underlying request once the last
//! // subscriber is gone.
//! entries.close();
//! dispatcher.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod arguments;
pub mod error;
pub mod events;
pub mod jdi;
pub mod memo;
pub mod pipeline;
pub mod profiles;
pub mod requests;

pub use arguments::{
    partition, Argument, CustomFilter, EventArgument, PartitionedArguments, RequestArgument,
    RequestId,
};
pub use error::{NativeError, RequestError};
pub use events::{AuxData, DispatcherHandle, EventManager};
pub use jdi::{
    DebuggerConnection, Event, EventKind, Location, NativeEvent, NativeRequest, ObjectId,
    RequestSpec, StepDepth, StepSize, SuspendPolicy, ThreadId, VmStatus,
};
pub use memo::MemoCell;
pub use pipeline::Pipeline;
pub use profiles::{EventDataPipeline, EventPipeline, KindProfile, Profile};
