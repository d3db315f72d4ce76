//! A winit window driving the render loop

use crate::RendererConfig;
use std::sync::Arc;
use thiserror::Error;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::WindowBuilder;

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("failed to create window: {0}")]
    Os(#[from] winit::error::OsError),
    #[error("event loop failed: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}

/// The window a frame callback renders into
pub struct Window {
    handle: Arc<winit::window::Window>,
    pending_resize: Option<(u32, u32)>,
}

impl Window {
    /// Shared handle for creating a surface
    pub fn window_arc(&self) -> Arc<winit::window::Window> {
        Arc::clone(&self.handle)
    }

    pub fn size(&self) -> (u32, u32) {
        let size = self.handle.inner_size();
        (size.width, size.height)
    }

    /// The latest size the window was resized to, once per resize burst
    pub fn take_resize(&mut self) -> Option<(u32, u32)> {
        self.pending_resize.take()
    }
}

/// Whether the loop keeps going after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Continue,
    Exit,
}

/// Open a window, build the state with `setup`, then call `frame` whenever
/// the loop goes idle. Closing the window or returning [`Frame::Exit`] ends
/// the loop.
pub fn run<T: 'static>(
    config: &RendererConfig,
    setup: impl FnOnce(&Window) -> T,
    mut frame: impl FnMut(&mut Window, &mut T) -> Frame + 'static,
) -> Result<(), WindowError> {
    let event_loop = EventLoop::new()?;
    let handle = WindowBuilder::new()
        .with_title(&config.title)
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .build(&event_loop)?;
    let mut window = Window {
        handle: Arc::new(handle),
        pending_resize: None,
    };
    let mut state = setup(&window);

    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run(move |event, target| match event {
        Event::WindowEvent {
            event: WindowEvent::Resized(size),
            ..
        } => window.pending_resize = Some((size.width, size.height)),
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        } => target.exit(),
        Event::AboutToWait => {
            if frame(&mut window, &mut state) == Frame::Exit {
                target.exit();
            }
        }
        _ => {}
    })?;
    Ok(())
}
