use hdd_dispatch::algs::communicator::{CommTag, Communicator, LocalComm, SerialComm, Wait};
use serial_test::serial;

#[test]
fn local_round_trip() {
    let tag = CommTag(0x1000);
    let world = LocalComm::world(2);

    let msg = b"hello";
    let _s = world[0].isend(1, tag.base(), msg);

    let mut buf = [0u8; 5];
    let h = world[1].irecv(0, tag.base(), &mut buf);
    let got = h.wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn local_fifo_order() {
    let tag = CommTag(0x1001);
    let world = LocalComm::world(2);

    for i in 0..10u8 {
        let _ = world[0].isend(1, tag.base(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let mut b = [0u8; 1];
        let h = world[1].irecv(0, tag.base(), &mut b);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn truncation_is_ok() {
    let tag = CommTag(0x1002);
    let world = LocalComm::world(2);

    let _ = world[0].isend(1, tag.base(), &[1, 2, 3, 4, 5, 6]);
    let mut b = [0u8; 4];
    let got = world[1].irecv(0, tag.base(), &mut b).wait().unwrap();
    assert_eq!(got, vec![1, 2, 3, 4]);
}

#[test]
fn tags_do_not_mix() {
    let world = LocalComm::world(2);
    let _ = world[0].isend(1, 7, &[7]);
    let _ = world[0].isend(1, 8, &[8]);
    let mut b = [0u8; 1];
    assert_eq!(world[1].irecv(0, 8, &mut b).wait(), Some(vec![8]));
    assert_eq!(world[1].irecv(0, 7, &mut b).wait(), Some(vec![7]));
}

#[test]
fn receive_blocks_until_send() {
    let world = LocalComm::world(2);
    let receiver = world[1].clone();
    let t = std::thread::spawn(move || {
        let mut b = [0u8; 3];
        receiver.irecv(0, 3, &mut b).wait()
    });
    std::thread::sleep(std::time::Duration::from_millis(20));
    let _ = world[0].isend(1, 3, &[1, 2, 3]);
    assert_eq!(t.join().unwrap(), Some(vec![1, 2, 3]));
}

#[test]
#[serial]
fn ranks_from_new_share_the_process_mailbox() {
    let tag = CommTag(0x1F00);
    let c0 = LocalComm::new(0, 2);
    let c1 = LocalComm::new(1, 2);
    let _ = c0.isend(1, tag.base(), &[42]);
    let mut b = [0u8; 1];
    assert_eq!(c1.irecv(0, tag.base(), &mut b).wait(), Some(vec![42]));
}

#[test]
fn serial_is_a_world_of_one() {
    assert_eq!(SerialComm.size(), 1);
    assert!(SerialComm.is_serial());
    assert!(!LocalComm::world(2)[0].is_serial());
}
