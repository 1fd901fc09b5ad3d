use xordht::{Contact, DhtError, NodeId, RoutingTable, Shortlist, K};

fn make_node_id(byte: u8) -> NodeId {
    let mut id = [0u8; 32];
    id[0] = byte;
    id
}

fn make_contact(byte: u8) -> Contact {
    Contact {
        id: make_node_id(byte),
        addr: ([127, 0, 0, 1], 30_000 + byte as u16).into(),
    }
}

#[test]
fn routing_table_orders_contacts_by_distance() {
    let mut table = RoutingTable::new(make_contact(0x00), &[]).unwrap();

    for contact in [make_contact(0x10), make_contact(0x20), make_contact(0x08)] {
        let _ = table.add(contact);
    }

    let target = make_node_id(0x18);
    let closest = table.n_closest(&target, 3).sorted_contacts();
    let ids: Vec<u8> = closest.iter().map(|c| c.id[0]).collect();
    assert_eq!(ids, vec![0x10, 0x08, 0x20]);
}

#[test]
fn buckets_never_exceed_capacity_or_hold_duplicates() {
    let mut table = RoutingTable::new(make_contact(0x00), &[]).unwrap();

    // Twice around the same bucket-0 contacts, plus more than K newcomers.
    for round in 0..2 {
        for i in 0..(K as u8 + 8) {
            let _ = table.add(make_contact(0x80 | i));
        }
        assert_eq!(table.len(), K, "round {round}");
    }

    let ids: Vec<NodeId> = table
        .n_closest(&make_node_id(0x80), K + 8)
        .sorted_contacts()
        .iter()
        .map(|c| c.id)
        .collect();
    let mut deduped = ids.clone();
    deduped.dedup();
    assert_eq!(ids.len(), deduped.len());
}

#[test]
fn seeds_populate_the_table() {
    let seeds = [make_contact(0x11), make_contact(0x22)];
    let table = RoutingTable::new(make_contact(0x00), &seeds).unwrap();
    assert_eq!(table.len(), 2);

    let closest = table.n_closest(&make_node_id(0x11), 1).sorted_contacts();
    assert_eq!(closest[0].id, seeds[0].id);
}

#[test]
fn bad_seed_sets_are_rejected() {
    let me = make_contact(0x01);
    assert_eq!(
        RoutingTable::new(me.clone(), &[make_contact(0x01)]).unwrap_err(),
        DhtError::SeedIsSelf
    );
    assert_eq!(
        RoutingTable::new(me, &[make_contact(0x02), make_contact(0x02)]).unwrap_err(),
        DhtError::DuplicateSeed
    );
}

#[test]
fn shortlist_tracks_the_k_closest_ever_added() {
    let target = make_node_id(0x00);
    let mut shortlist = Shortlist::new(target, K);

    // More than K candidates, farthest first.
    for i in (0..K as u8 + 10).rev() {
        shortlist.add([make_contact(0x20 + i)]);
    }
    assert_eq!(shortlist.len(), K);

    let contacts = shortlist.sorted_contacts();
    let expected: Vec<u8> = (0..K as u8).map(|i| 0x20 + i).collect();
    let actual: Vec<u8> = contacts.iter().map(|c| c.id[0]).collect();
    assert_eq!(actual, expected);

    // A removed contact stays gone until something re-adds it.
    shortlist.remove(&make_node_id(0x20));
    assert!(shortlist
        .sorted_contacts()
        .iter()
        .all(|c| c.id != make_node_id(0x20)));
}
