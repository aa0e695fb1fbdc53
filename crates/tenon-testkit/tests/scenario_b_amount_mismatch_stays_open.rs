//! Scenario B: two sources agree on the reference but not on the amount.
//!
//! GREEN when:
//! - The events are linked with a non-zero confidence
//! - The flow's state is not final
//! - An AMOUNT_MISMATCH discrepancy is recorded against the flow

use chrono::Duration;

use tenon_schemas::{DiscrepancyType, LinkType};
use tenon_testkit::{bank, discrepancies, links, psp, Harness};

#[test]
fn amount_mismatch_links_but_does_not_settle() {
    let mut h = Harness::new().unwrap();

    let x = h
        .ingest(psp(Some("ch_b"), "INV-B", "payment.created", 10_000, "USD"))
        .unwrap();
    h.advance(Duration::minutes(30));
    let y = h
        .ingest(bank("stmt-b", "INV-B", "BOOKED", "90.00", "USD"))
        .unwrap();
    h.derive().unwrap();
    let (x, y) = (x.event_id.unwrap(), y.event_id.unwrap());

    let log = h.log();
    let link = links(log)
        .into_iter()
        .find(|l| l.touches(x) && l.touches(y))
        .expect("X and Y linked");
    assert_eq!(link.link_type, LinkType::PotentialMatch);
    assert!(link.confidence_score.bps() > 0);

    let projection = h.pipeline.projection();
    let flow_id = projection.event(x).unwrap().flow_id.unwrap();
    assert_eq!(projection.event(y).unwrap().flow_id.as_deref(), Some(flow_id.as_str()));

    let flow = projection.flow(&flow_id).unwrap();
    assert!(!flow.latest_state.current_state.is_final());

    let mismatch: Vec<_> = discrepancies(log)
        .into_iter()
        .filter(|d| d.flow_id == flow_id && d.discrepancy_type == DiscrepancyType::AmountMismatch)
        .collect();
    assert!(!mismatch.is_empty());
    assert!(mismatch[0].supporting_links.contains(&link.link_id));
}
