//! Windows named pipe acceptor.
//!
//! A pipe server instance serves exactly one client, so the acceptor keeps
//! one idle instance waiting and creates its successor each time a client
//! connects.

use std::ffi::c_void;
use std::io;
use std::mem;

use dockplug_config::PipeOptions;
use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};
use windows::Win32::Foundation::{HLOCAL, LocalFree};
use windows::Win32::Security::Authorization::ConvertStringSecurityDescriptorToSecurityDescriptorW;
use windows::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};
use windows::core::PCWSTR;

use super::ListenerError;

const SDDL_REVISION: u32 = 1;

/// Address and options for a pipe whose first instance is created lazily.
#[derive(Debug, Clone)]
pub(crate) struct NamedPipeBinding {
    pub(crate) address: String,
    pub(crate) options: PipeOptions,
}

impl NamedPipeBinding {
    /// Checks that this process can create the first instance of the pipe.
    ///
    /// The check instance lives on a throwaway current-thread runtime and is
    /// closed before returning. Serving creates the long-lived instance.
    pub(crate) fn claim(&self) -> Result<(), ListenerError> {
        let failed = |source| ListenerError::NamedPipeClaim {
            address: self.address.clone(),
            source,
        };
        let security = self
            .options
            .security_descriptor
            .as_deref()
            .map(SecurityDescriptor::parse)
            .transpose()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .map_err(failed)?;
        let _context = runtime.enter();
        create_instance(self, security.as_ref(), true)
            .map(drop)
            .map_err(failed)
    }
}

/// Hands out connected pipe instances.
pub(crate) struct PipeAcceptor {
    binding: NamedPipeBinding,
    security: Option<SecurityDescriptor>,
    waiting: NamedPipeServer,
}

impl PipeAcceptor {
    /// Creates the first pipe instance. Must run inside a tokio runtime.
    pub(crate) fn bind(binding: NamedPipeBinding) -> Result<Self, io::Error> {
        let security = binding
            .options
            .security_descriptor
            .as_deref()
            .map(SecurityDescriptor::parse)
            .transpose()
            .map_err(io::Error::other)?;
        let waiting = create_instance(&binding, security.as_ref(), true)?;
        Ok(Self {
            binding,
            security,
            waiting,
        })
    }

    /// Waits for a client, returning its connected instance.
    pub(crate) async fn accept(&mut self) -> io::Result<NamedPipeServer> {
        self.waiting.connect().await?;
        let next = create_instance(&self.binding, self.security.as_ref(), false)?;
        Ok(mem::replace(&mut self.waiting, next))
    }
}

fn create_instance(
    binding: &NamedPipeBinding,
    security: Option<&SecurityDescriptor>,
    first: bool,
) -> io::Result<NamedPipeServer> {
    let mut options = ServerOptions::new();
    options
        .first_pipe_instance(first)
        .pipe_mode(PipeMode::Message)
        .in_buffer_size(binding.options.in_buffer_size)
        .out_buffer_size(binding.options.out_buffer_size);
    match security {
        Some(descriptor) => {
            let mut attributes = SECURITY_ATTRIBUTES {
                nLength: u32::try_from(mem::size_of::<SECURITY_ATTRIBUTES>())
                    .unwrap_or(u32::MAX),
                lpSecurityDescriptor: descriptor.raw.0,
                bInheritHandle: false.into(),
            };
            let attributes_ptr: *mut c_void = (&raw mut attributes).cast();
            // SAFETY: `attributes` is a valid SECURITY_ATTRIBUTES whose
            // descriptor stays allocated for the lifetime of `descriptor`.
            unsafe { options.create_with_security_attributes_raw(&binding.address, attributes_ptr) }
        }
        None => options.create(&binding.address),
    }
}

/// Self-relative security descriptor parsed from SDDL.
struct SecurityDescriptor {
    raw: PSECURITY_DESCRIPTOR,
}

impl SecurityDescriptor {
    fn parse(sddl: &str) -> Result<Self, ListenerError> {
        let wide: Vec<u16> = sddl.encode_utf16().chain(std::iter::once(0)).collect();
        let mut raw = PSECURITY_DESCRIPTOR::default();
        // SAFETY: `wide` is NUL-terminated and outlives the call; `raw` is
        // written by the system on success and released in `Drop`.
        unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                PCWSTR(wide.as_ptr()),
                SDDL_REVISION,
                &mut raw,
                None,
            )
        }
        .map_err(|error| ListenerError::SecurityDescriptor {
            descriptor: sddl.to_owned(),
            reason: error.to_string(),
        })?;
        Ok(Self { raw })
    }
}

impl Drop for SecurityDescriptor {
    fn drop(&mut self) {
        // SAFETY: the descriptor was allocated with LocalAlloc by
        // ConvertStringSecurityDescriptorToSecurityDescriptorW.
        unsafe {
            LocalFree(HLOCAL(self.raw.0));
        }
    }
}
