use bytes::Bytes;
use regiond::core::master::{Instruction, InstructionQueue, MessageBuffer, OutboundMessage};
use regiond::core::region::{RegionDescriptor, TableSchema};
use std::time::Duration;

fn descriptor(id: u64) -> RegionDescriptor {
    RegionDescriptor::new(
        TableSchema::new("users", vec!["f".to_string()]),
        Bytes::new(),
        Bytes::new(),
        id,
    )
}

#[test]
fn test_outbound_buffer_preserves_append_order_and_duplicates() {
    let buffer = MessageBuffer::new();
    buffer.push(OutboundMessage::ReportOpen(descriptor(1)));
    buffer.push(OutboundMessage::ReportProcessOpen(descriptor(2)));
    buffer.push(OutboundMessage::ReportProcessOpen(descriptor(2)));

    let drained = buffer.take_all();
    assert_eq!(drained.len(), 3);
    assert!(matches!(drained[0], OutboundMessage::ReportOpen(_)));
    // No dedupe: the master tolerates repeats.
    assert_eq!(drained[1], drained[2]);

    assert!(buffer.is_empty());
    assert!(buffer.take_all().is_empty());
}

#[tokio::test]
async fn test_instruction_queue_is_a_bounded_fifo() {
    let queue = InstructionQueue::new(2);
    assert!(queue.try_push(Instruction::RegionOpen(descriptor(1))).is_ok());
    assert!(queue.try_push(Instruction::RegionOpen(descriptor(2))).is_ok());
    // Full: the push is refused and the instruction handed back.
    let refused = queue.try_push(Instruction::ServerQuiesce);
    assert!(matches!(refused, Err(Instruction::ServerQuiesce)));

    let first = queue.poll(Duration::from_millis(10)).await.unwrap();
    assert!(matches!(first.instruction, Instruction::RegionOpen(ref d) if d.region_id == 1));
    let second = queue.poll(Duration::from_millis(10)).await.unwrap();
    assert!(matches!(second.instruction, Instruction::RegionOpen(ref d) if d.region_id == 2));
    assert!(queue.poll(Duration::from_millis(10)).await.is_none());
}

#[tokio::test]
async fn test_requeue_puts_the_entry_back_at_the_head() {
    let queue = InstructionQueue::new(8);
    queue.try_push(Instruction::RegionOpen(descriptor(1))).unwrap();
    queue.try_push(Instruction::RegionOpen(descriptor(2))).unwrap();

    let mut entry = queue.poll(Duration::from_millis(10)).await.unwrap();
    entry.attempts += 1;
    queue.requeue(entry);

    let retried = queue.poll(Duration::from_millis(10)).await.unwrap();
    assert_eq!(retried.attempts, 1);
    assert!(matches!(retried.instruction, Instruction::RegionOpen(ref d) if d.region_id == 1));
}

#[test]
fn test_pending_opens_snapshot_only_lists_opens() {
    let queue = InstructionQueue::new(8);
    queue.try_push(Instruction::RegionOpen(descriptor(1))).unwrap();
    queue.try_push(Instruction::RegionClose(descriptor(2))).unwrap();
    queue.try_push(Instruction::RegionOpen(descriptor(3))).unwrap();

    let opens = queue.pending_opens();
    assert_eq!(opens.len(), 2);
    assert_eq!(opens[0].region_id, 1);
    assert_eq!(opens[1].region_id, 3);
    // Snapshotting does not consume the queue.
    assert_eq!(queue.len(), 3);
}
