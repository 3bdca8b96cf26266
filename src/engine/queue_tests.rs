//! Tests for the in-order command queue.

use crate::config::EngineConfig;
use crate::engine::queue::CommandQueue;
use crate::engine::Engine;
use crate::error::Status;
use crate::memory::Buffer;

fn device_buffer(size: usize) -> Buffer {
    let engine = Engine::new(&EngineConfig::device()).unwrap();
    Buffer::new(&engine, size).unwrap()
}

#[test]
fn write_then_read_round_trips() {
    let queue = CommandQueue::new("test-queue").unwrap();
    let buffer = device_buffer(16);

    queue
        .enqueue_write(buffer.clone(), 4, vec![1, 2, 3, 4])
        .unwrap()
        .wait()
        .unwrap();
    let bytes = queue.enqueue_read(buffer, 2, 8).unwrap().wait().unwrap();

    assert_eq!(bytes, vec![0, 0, 1, 2, 3, 4, 0, 0]);
    assert_eq!(queue.completed(), 2);
}

#[test]
fn commands_execute_in_order() {
    let queue = CommandQueue::new("ordered").unwrap();
    let buffer = device_buffer(1);

    let events: Vec<_> = (0..32u8)
        .map(|v| queue.enqueue_write(buffer.clone(), 0, vec![v]).unwrap())
        .collect();
    let read = queue.enqueue_read(buffer, 0, 1).unwrap();

    for event in events {
        event.wait().unwrap();
    }
    assert_eq!(read.wait().unwrap(), vec![31]);
}

#[test]
fn out_of_range_copy_reports_invalid_arguments() {
    let queue = CommandQueue::new("bounds").unwrap();
    let buffer = device_buffer(4);
    let result = queue.enqueue_read(buffer, 2, 4).unwrap().wait();
    assert_eq!(Status::of(&result), Status::InvalidArguments);
}

#[test]
fn enqueue_after_shutdown_fails() {
    let queue = CommandQueue::new("stopped").unwrap();
    queue.shutdown();
    assert!(queue.is_shut_down());
    queue.shutdown();

    let result = queue.enqueue_write(device_buffer(4), 0, vec![0; 4]);
    assert_eq!(Status::of(&result), Status::RuntimeError);
}

#[test]
fn shutdown_drains_pending_commands() {
    let queue = CommandQueue::new("drain").unwrap();
    let buffer = device_buffer(8);
    let event = queue.enqueue_write(buffer.clone(), 0, vec![5; 8]).unwrap();
    queue.shutdown();

    event.wait().unwrap();
    assert_eq!(buffer.read_bytes(0, 8).unwrap(), vec![5; 8]);
}
