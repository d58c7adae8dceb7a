use std::sync::{Arc, Mutex};

use mux_hal::{
    Buffer, Context, Device, DeviceConfig, Event, ExecutionStatus, Kernel, KernelArg, NdRange,
    Operation, Queue, QueueProperties,
};
use pretty_assertions::assert_eq;

fn context() -> (Context, Device) {
    let dev = Device::new(DeviceConfig::default());
    let ctx = Context::new(&[dev.clone()]).unwrap();
    (ctx, dev)
}

#[test]
fn events_order_work_across_queues() {
    let (ctx, dev) = context();
    let a = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
    let b = Queue::new(&ctx, &dev, QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE).unwrap();
    let src = Buffer::new(&ctx, 16).unwrap();
    let dst = Buffer::new(&ctx, 16).unwrap();

    let gate = Event::user(&ctx);
    let fill = a
        .enqueue(
            Operation::FillBuffer {
                buffer: src.clone(),
                pattern: vec![0xAB, 0xCD],
                offset: 0,
                size: 16,
            },
            &[gate.clone()],
        )
        .unwrap();
    let copy = b
        .enqueue(
            Operation::CopyBuffer {
                src: src.clone(),
                dst: dst.clone(),
                src_offset: 0,
                dst_offset: 0,
                size: 16,
            },
            &[fill.clone()],
        )
        .unwrap();
    assert_eq!(copy.status(), ExecutionStatus::Submitted);

    gate.set_user_status(ExecutionStatus::Complete).unwrap();
    copy.wait().unwrap();
    assert_eq!(fill.status(), ExecutionStatus::Complete);
    assert_eq!(dst.to_vec(), [0xABu8, 0xCD].repeat(8));
}

#[test]
fn dispatch_runs_every_work_item_once() {
    let (ctx, dev) = context();
    let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
    let out = Buffer::new(&ctx, 4 * 6).unwrap();
    let kernel = Kernel::builder(&ctx, "ids", 1).build(|item, args| {
        let out = args[0].as_buffer().unwrap();
        let id = item.linear_global_id() as u32;
        out.write(id as usize * 4, &(id + 100).to_le_bytes()).unwrap();
    });
    kernel.set_arg(0, KernelArg::Buffer(out.clone())).unwrap();
    let invocation = kernel
        .specialize(NdRange {
            work_dim: 2,
            global_offset: [0; 3],
            global_size: [3, 2, 1],
            local_size: [1, 2, 1],
        })
        .unwrap();

    queue
        .enqueue(Operation::Dispatch(invocation), &[])
        .unwrap()
        .wait()
        .unwrap();
    let words: Vec<u32> = out
        .to_vec()
        .chunks(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(words, vec![100, 101, 102, 103, 104, 105]);
}

#[test]
fn completion_hooks_run_in_submission_order() {
    let (ctx, dev) = context();
    let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let events: Vec<Event> = (0..5)
        .map(|i| {
            let signal = queue.new_event(mux_hal::CommandType::Marker);
            let seen = Arc::clone(&seen);
            queue
                .submit(mux_hal::Submission {
                    operation: Operation::Marker,
                    wait_list: Vec::new(),
                    signal: signal.clone(),
                    on_complete: Some(Box::new(move |status: ExecutionStatus| {
                        seen.lock().unwrap().push((i, status));
                    })),
                })
                .unwrap();
            signal
        })
        .collect();

    Event::wait_all(&events).unwrap();
    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        (0..5).map(|i| (i, ExecutionStatus::Complete)).collect::<Vec<_>>()
    );
}

#[test]
fn dropping_a_queue_drains_submitted_work() {
    let (ctx, dev) = context();
    let buf = Buffer::new(&ctx, 8).unwrap();
    let event = {
        let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
        queue.enqueue_write_buffer(&buf, 0, &[9; 8], &[]).unwrap()
    };
    event.wait().unwrap();
    assert_eq!(buf.to_vec(), vec![9; 8]);
}

#[test]
fn read_buffer_observes_earlier_writes() {
    let (ctx, dev) = context();
    let queue = Queue::new(&ctx, &dev, QueueProperties::empty()).unwrap();
    let buf = Buffer::new(&ctx, 8).unwrap();
    queue.enqueue_write_buffer(&buf, 2, &[1, 2, 3], &[]).unwrap();
    assert_eq!(queue.read_buffer(&buf, 0, 6, &[]).unwrap(), vec![0, 0, 1, 2, 3, 0]);
    queue.finish().unwrap();
}
