use std::sync::{Arc, Mutex};
use std::thread;

use crate::consts::LOCK_DELAY;

//            P1      P2      P3      P4
//            |       |       |       |
//  door1   +---+   +---+   +---+   +---+
//  room1   |   |   |   |   |   |   |   |
//  door2   +---+   +---+   +---+   +---+
//  room2   |   |   |   |   |   |   |   |
//  door3   +---+   +---+   +---+   +---+
//  room3   |   |   |   |   |   |   |   |
//  door4   +---+   +---+   +---+   +---+
//            |       |       |       |
//
// door1 opens when the middle room is occupied or the last room is empty;
// door2 opens when two or more occupants are in the middle room or the
// last room is empty; door3 is always open; door4 opens when the middle
// room is empty.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Room {
    First,
    Middle,
    Last,
    Outside,
}

#[derive(Debug, Default)]
struct Rooms {
    first: usize,
    middle: usize,
    last: usize,
}

/// The three-room airlock ordering transaction windows across processes.
///
/// Readers walk first → middle (their window) → last → out; a committing
/// writer walks first → last (its window) → out. The door rules let a
/// cohort of readers keep flowing while a writer waits, and
/// `leave_last_room` holds the writer until every reader that entered the
/// middle room ahead of it has moved on.
pub struct Gateway {
    rooms: Mutex<Rooms>,
}

impl Gateway {
    pub fn new() -> Self {
        Gateway {
            rooms: Mutex::new(Rooms::default()),
        }
    }

    /// Pass door1 and enter the first room.
    pub fn go_first_room(self: &Arc<Self>) -> GatewayPass {
        loop {
            {
                let mut rooms = self.rooms.lock().unwrap();
                if rooms.middle > 0 || rooms.last == 0 {
                    rooms.first += 1;
                    return GatewayPass {
                        gateway: Arc::clone(self),
                        room: Room::First,
                    };
                }
            }
            thread::sleep(LOCK_DELAY);
        }
    }

    #[cfg(test)]
    fn occupancy(&self) -> (usize, usize, usize) {
        let rooms = self.rooms.lock().unwrap();
        (rooms.first, rooms.middle, rooms.last)
    }
}

/// One occupant moving through the gateway. Dropping the pass walks the
/// occupant out through the remaining rooms.
pub struct GatewayPass {
    gateway: Arc<Gateway>,
    room: Room,
}

impl GatewayPass {
    /// Pass door2 into the middle room; returns the middle occupancy.
    pub fn go_middle_room(&mut self) -> usize {
        assert_eq!(self.room, Room::First, "door2 is entered from room 1");
        loop {
            {
                let mut rooms = self.gateway.rooms.lock().unwrap();
                if rooms.middle >= 2 || rooms.last == 0 {
                    rooms.first -= 1;
                    rooms.middle += 1;
                    self.room = Room::Middle;
                    return rooms.middle;
                }
            }
            thread::sleep(LOCK_DELAY);
        }
    }

    /// Pass door3 into the last room; always open.
    pub fn go_last_room(&mut self) {
        let mut rooms = self.gateway.rooms.lock().unwrap();
        match self.room {
            Room::First => rooms.first -= 1,
            Room::Middle => rooms.middle -= 1,
            Room::Last | Room::Outside => panic!("door3 is entered from room 1 or 2"),
        }
        rooms.last += 1;
        self.room = Room::Last;
    }

    /// Wait at door4 until the middle room is empty, then leave.
    pub fn leave_last_room(mut self) {
        assert_eq!(self.room, Room::Last, "door4 is left from room 3");
        self.walk_out();
    }

    fn walk_out(&mut self) {
        loop {
            {
                let mut rooms = self.gateway.rooms.lock().unwrap();
                if rooms.middle == 0 {
                    rooms.last -= 1;
                    self.room = Room::Outside;
                    return;
                }
            }
            thread::sleep(LOCK_DELAY);
        }
    }
}

impl Drop for GatewayPass {
    fn drop(&mut self) {
        // walk the occupant out so an abandoned pass never wedges a door
        match self.room {
            Room::First => {
                let mut rooms = self.gateway.rooms.lock().unwrap();
                rooms.first -= 1;
            }
            Room::Middle => {
                let mut rooms = self.gateway.rooms.lock().unwrap();
                rooms.middle -= 1;
            }
            Room::Last => self.walk_out(),
            Room::Outside => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_single_walkthrough() {
        let gateway = Arc::new(Gateway::new());
        let mut pass = gateway.go_first_room();
        assert_eq!(gateway.occupancy(), (1, 0, 0));
        assert_eq!(pass.go_middle_room(), 1);
        assert_eq!(gateway.occupancy(), (0, 1, 0));
        pass.go_last_room();
        assert_eq!(gateway.occupancy(), (0, 0, 1));
        pass.leave_last_room();
        assert_eq!(gateway.occupancy(), (0, 0, 0));
    }

    #[test]
    fn test_writer_skips_middle() {
        let gateway = Arc::new(Gateway::new());
        let mut pass = gateway.go_first_room();
        pass.go_last_room();
        assert_eq!(gateway.occupancy(), (0, 0, 1));
        pass.leave_last_room();
        assert_eq!(gateway.occupancy(), (0, 0, 0));
    }

    #[test]
    fn test_abandoned_pass_leaves() {
        let gateway = Arc::new(Gateway::new());
        {
            let mut pass = gateway.go_first_room();
            pass.go_middle_room();
        }
        assert_eq!(gateway.occupancy(), (0, 0, 0));
    }

    #[test]
    fn test_writer_waits_for_middle_readers() {
        // one writer, three readers: the writer must not finish
        // leave_last_room while any reader that entered the middle room
        // before its first-room entry is still there
        let gateway = Arc::new(Gateway::new());
        let in_middle = Arc::new(AtomicUsize::new(0));
        let departed = Arc::new(AtomicUsize::new(0));
        let writer_done = Arc::new(AtomicUsize::new(0));

        crossbeam::thread::scope(|s| {
            for _ in 0..3 {
                let gateway = Arc::clone(&gateway);
                let in_middle = Arc::clone(&in_middle);
                let departed = Arc::clone(&departed);
                let writer_done = Arc::clone(&writer_done);
                s.spawn(move |_| {
                    let mut pass = gateway.go_first_room();
                    pass.go_middle_room();
                    in_middle.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(80));
                    // the writer is still held at door4
                    assert_eq!(writer_done.load(Ordering::SeqCst), 0);
                    pass.go_last_room();
                    departed.fetch_add(1, Ordering::SeqCst);
                    pass.leave_last_room();
                });
            }

            // let every reader reach the middle room first
            while in_middle.load(Ordering::SeqCst) < 3 {
                thread::sleep(Duration::from_millis(1));
            }

            let gateway_w = Arc::clone(&gateway);
            let departed_w = Arc::clone(&departed);
            let writer_done_w = Arc::clone(&writer_done);
            s.spawn(move |_| {
                let mut pass = gateway_w.go_first_room();
                pass.go_last_room();
                pass.leave_last_room();
                // all three readers left the middle room before this point
                assert_eq!(departed_w.load(Ordering::SeqCst), 3);
                writer_done_w.store(1, Ordering::SeqCst);
            });
        })
        .unwrap();

        assert_eq!(writer_done.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.occupancy(), (0, 0, 0));
    }
}
