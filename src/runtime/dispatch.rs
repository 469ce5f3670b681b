//! Compute dispatch
//!
//! Filters with a GPU path record their work into a [`CommandBuffer`]: numbered
//! buffer bindings, a few scalar arguments and one dispatch of N workgroups.
//! A [`ComputeQueue`] submits the buffer and blocks until the device is done.
//!
//! [`HostComputeQueue`] is the reference queue: it runs kernels on a pool of
//! scoped worker threads against the device side of each [`AcceleratorBuffer`]
//! and collects completions over a crossbeam channel.

use super::buffer::AcceleratorBuffer;
use super::errors::DispatchError;
use super::watchdog::{DEFAULT_STALL_THRESHOLD, StallMonitor};
use crossbeam_channel::{RecvTimeoutError, unbounded};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// A data-parallel kernel: one invocation per global thread id
pub trait ComputeKernel: Send + Sync {
    fn name(&self) -> &str;

    /// Number of binding slots, output included
    fn binding_count(&self) -> usize;

    /// Slot the kernel writes to
    fn output_slot(&self) -> usize;

    /// Threads per workgroup
    fn block_size(&self) -> usize;

    /// Compute the output element for thread `gid`
    ///
    /// `inputs` holds the bound input slots in slot order, output excluded.
    /// Returns `None` for threads past the end of the work.
    fn invoke(&self, gid: usize, args: &[u32], inputs: &[&[f32]]) -> Option<f32>;
}

/// Workgroups needed to cover `n` threads
pub fn compute_block_count(n: usize, block_size: usize) -> usize {
    n.div_ceil(block_size.max(1))
}

/// Recorded work for one submission
pub struct CommandBuffer<'a> {
    inputs: Vec<(usize, &'a AcceleratorBuffer<f32>)>,
    output: Option<(usize, &'a mut AcceleratorBuffer<f32>)>,
    args: Vec<u32>,
    dispatch: Option<(&'a dyn ComputeKernel, usize)>,
}

impl<'a> CommandBuffer<'a> {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            output: None,
            args: Vec::new(),
            dispatch: None,
        }
    }

    /// Bind a read-only buffer. It must already be device resident.
    pub fn bind_input(&mut self, slot: usize, buffer: &'a AcceleratorBuffer<f32>) -> &mut Self {
        self.inputs.push((slot, buffer));
        self
    }

    /// Bind the buffer the kernel writes. Its device side must already have the
    /// output length; the caller marks it modified from the GPU afterwards.
    pub fn bind_output(&mut self, slot: usize, buffer: &'a mut AcceleratorBuffer<f32>) -> &mut Self {
        self.output = Some((slot, buffer));
        self
    }

    pub fn push_constants(&mut self, args: &[u32]) -> &mut Self {
        self.args.clear();
        self.args.extend_from_slice(args);
        self
    }

    pub fn dispatch(&mut self, kernel: &'a dyn ComputeKernel, groups: usize) -> &mut Self {
        self.dispatch = Some((kernel, groups));
        self
    }
}

impl Default for CommandBuffer<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Something that can run a command buffer to completion
pub trait ComputeQueue {
    /// Submit and block until the device signals completion
    fn submit_and_block(&mut self, cmd: CommandBuffer<'_>) -> Result<(), DispatchError>;
}

/// Reference queue executing kernels on host worker threads
pub struct HostComputeQueue {
    workers: usize,
    poll_interval: Duration,
    stall_threshold: Duration,
    submissions: u64,
}

impl HostComputeQueue {
    pub fn new() -> Self {
        let workers = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            workers,
            poll_interval: Duration::from_millis(100),
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            submissions: 0,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Number of command buffers run so far
    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}

impl Default for HostComputeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeQueue for HostComputeQueue {
    fn submit_and_block(&mut self, cmd: CommandBuffer<'_>) -> Result<(), DispatchError> {
        let (kernel, groups) = cmd.dispatch.ok_or(DispatchError::NothingRecorded)?;
        let name = kernel.name().to_string();
        let binding_count = kernel.binding_count();

        let (out_slot, output) = cmd
            .output
            .ok_or_else(|| DispatchError::MissingOutput(name.clone()))?;
        if out_slot >= binding_count {
            return Err(DispatchError::SlotOutOfRange {
                kernel: name,
                slot: out_slot,
                count: binding_count,
            });
        }

        let mut inputs: Vec<&[f32]> = Vec::with_capacity(binding_count.saturating_sub(1));
        for slot in (0..binding_count).filter(|&s| s != kernel.output_slot()) {
            let (_, buf) = cmd
                .inputs
                .iter()
                .rev()
                .find(|(s, _)| *s == slot)
                .ok_or_else(|| DispatchError::UnboundInput {
                    kernel: name.clone(),
                    slot,
                })?;
            if !buf.is_gpu_resident() {
                return Err(DispatchError::InputNotResident {
                    kernel: name.clone(),
                    slot,
                });
            }
            inputs.push(buf.device_slice());
        }
        if let Some((slot, _)) = cmd.inputs.iter().find(|(s, _)| *s >= binding_count) {
            return Err(DispatchError::SlotOutOfRange {
                kernel: name,
                slot: *slot,
                count: binding_count,
            });
        }

        self.submissions += 1;
        if groups == 0 {
            return Ok(());
        }

        let block = kernel.block_size().max(1);
        let workers = self.workers.min(groups).max(1);
        debug!(
            "[{}] dispatch {} workgroups of {} on {} workers",
            name, groups, block, workers
        );

        // Round-robin workgroups over workers
        let mut assignments: Vec<Vec<(usize, &mut [f32])>> = (0..workers).map(|_| Vec::new()).collect();
        for (group, chunk) in output.device_slice_mut().chunks_mut(block).take(groups).enumerate() {
            assignments[group % workers].push((group, chunk));
        }

        let args = cmd.args.as_slice();
        let inputs = inputs.as_slice();
        let poll_interval = self.poll_interval;
        let stall_threshold = self.stall_threshold;

        thread::scope(|s| {
            let (done_tx, done_rx) = unbounded::<usize>();

            let handles: Vec<_> = assignments
                .into_iter()
                .map(|work| {
                    let done_tx = done_tx.clone();
                    s.spawn(move || {
                        let mut groups_done = 0;
                        for (group, chunk) in work {
                            for (k, out) in chunk.iter_mut().enumerate() {
                                if let Some(v) = kernel.invoke(group * block + k, args, inputs) {
                                    *out = v;
                                }
                            }
                            groups_done += 1;
                        }
                        let _ = done_tx.send(groups_done);
                    })
                })
                .collect();
            drop(done_tx);

            let mut monitor = StallMonitor::new(&name, "waiting for compute queue", stall_threshold);
            let mut pending = handles.len();
            let mut result = Ok(());
            while pending > 0 {
                match done_rx.recv_timeout(poll_interval) {
                    Ok(n) => {
                        trace!("[{}] worker finished {} workgroups", name, n);
                        pending -= 1;
                    }
                    Err(RecvTimeoutError::Timeout) => monitor.check(),
                    Err(RecvTimeoutError::Disconnected) => {
                        result = Err(DispatchError::DeviceLost);
                        break;
                    }
                }
            }

            for handle in handles {
                if handle.join().is_err() {
                    result = Err(DispatchError::DeviceLost);
                }
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scale;

    impl ComputeKernel for Scale {
        fn name(&self) -> &str {
            "scale"
        }

        fn binding_count(&self) -> usize {
            2
        }

        fn output_slot(&self) -> usize {
            1
        }

        fn block_size(&self) -> usize {
            4
        }

        fn invoke(&self, gid: usize, args: &[u32], inputs: &[&[f32]]) -> Option<f32> {
            if gid >= args[0] as usize {
                return None;
            }
            Some(inputs[0][gid] * args[1] as f32)
        }
    }

    #[test]
    fn test_block_count() {
        assert_eq!(compute_block_count(0, 64), 0);
        assert_eq!(compute_block_count(64, 64), 1);
        assert_eq!(compute_block_count(65, 64), 2);
    }

    #[test]
    fn test_host_queue_runs_kernel() {
        let mut din = AcceleratorBuffer::from_vec((0..10).map(|i| i as f32).collect());
        din.prepare_for_gpu_access();
        let mut dout = AcceleratorBuffer::from_vec(vec![-1.0f32; 10]);
        dout.prepare_for_gpu_access();

        let kernel = Scale;
        let mut queue = HostComputeQueue::new().with_workers(3);
        let mut cmd = CommandBuffer::new();
        cmd.bind_input(0, &din)
            .bind_output(1, &mut dout)
            .push_constants(&[9, 2])
            .dispatch(&kernel, compute_block_count(9, kernel.block_size()));
        queue.submit_and_block(cmd).unwrap();
        dout.mark_modified_from_gpu();

        dout.prepare_for_cpu_access();
        let expected: Vec<f32> = (0..9).map(|i| (2 * i) as f32).chain([-1.0]).collect();
        assert_eq!(dout.as_slice(), expected.as_slice());
        assert_eq!(queue.submissions(), 1);
    }

    #[test]
    fn test_unbound_and_missing() {
        let kernel = Scale;
        let mut queue = HostComputeQueue::new();

        let mut dout = AcceleratorBuffer::from_vec(vec![0.0f32; 4]);
        let mut cmd = CommandBuffer::new();
        cmd.bind_output(1, &mut dout).dispatch(&kernel, 1);
        assert!(matches!(
            queue.submit_and_block(cmd),
            Err(DispatchError::UnboundInput { slot: 0, .. })
        ));

        let din = AcceleratorBuffer::from_vec(vec![0.0f32; 4]);
        let mut cmd = CommandBuffer::new();
        cmd.bind_input(0, &din).dispatch(&kernel, 1);
        assert!(matches!(queue.submit_and_block(cmd), Err(DispatchError::MissingOutput(_))));

        assert!(matches!(
            queue.submit_and_block(CommandBuffer::new()),
            Err(DispatchError::NothingRecorded)
        ));
    }

    #[test]
    fn test_input_must_be_resident() {
        let kernel = Scale;
        let din = AcceleratorBuffer::from_vec(vec![1.0f32; 4]);
        let mut dout = AcceleratorBuffer::from_vec(vec![0.0f32; 4]);
        let mut cmd = CommandBuffer::new();
        cmd.bind_input(0, &din).bind_output(1, &mut dout).push_constants(&[4, 1]).dispatch(&kernel, 1);
        assert!(matches!(
            HostComputeQueue::new().submit_and_block(cmd),
            Err(DispatchError::InputNotResident { slot: 0, .. })
        ));
    }
}
