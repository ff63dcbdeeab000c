//! Pool add/remove balancing.
//!
//! When the pool grows, new hosts go to the least-populated zone; when it
//! shrinks, hosts are reclaimed from the most-populated zone first. Only
//! hosts with zero containers are ever candidates for removal, and among
//! those the newest is preferred (least sunk cost).

use std::collections::HashMap;

use tracing::warn;

use stevedore_core::HostId;

/// Snapshot of one pool member for the balancing algorithms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFootprint {
    pub id: HostId,
    /// Zone/location the host lives in; hosts without one share a bucket.
    pub zone: Option<String>,
    pub container_count: u32,
    /// Creation time in Unix epoch seconds.
    pub created_at: u64,
}

const UNZONED: &str = "";

fn zone_key(zone: &Option<String>) -> &str {
    zone.as_deref().unwrap_or(UNZONED)
}

/// Choose zones for `n` additional hosts, least-populated first.
///
/// `zones` lists every zone new hosts may go to (including empty ones);
/// `members` is the current pool. Each pick counts toward the next, so
/// additions spread evenly.
pub fn zones_for_additions(
    members: &[HostFootprint],
    zones: &[String],
    n: usize,
) -> Vec<String> {
    let mut sizes: HashMap<&str, usize> = zones.iter().map(|z| (z.as_str(), 0)).collect();
    for member in members {
        *sizes.entry(zone_key(&member.zone)).or_insert(0) += 1;
    }

    let mut result = Vec::with_capacity(n);
    for _ in 0..n {
        // Ties broken by zone name so picks are deterministic.
        let Some((&zone, _)) = sizes
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
        else {
            break;
        };
        result.push(zone.to_string());
        if let Some(size) = sizes.get_mut(zone) {
            *size += 1;
        }
    }
    result
}

/// Choose up to `n` hosts to reclaim when the pool shrinks.
///
/// Repeatedly picks the most-populated zone to free up room, then within
/// each zone takes empty hosts only, newest creation time first. Returns
/// fewer than `n` hosts when not enough empty hosts exist; a host with
/// any live container is never returned.
pub fn hosts_to_remove(members: &[HostFootprint], n: usize) -> Vec<HostId> {
    if members.is_empty() || n == 0 {
        return Vec::new();
    }

    let n = if members.len() < n {
        warn!(
            requested = n,
            members = members.len(),
            "asked to remove more hosts than exist, clamping"
        );
        members.len()
    } else {
        n
    };

    // Host count per zone, decremented as picks are made.
    let mut sizes: HashMap<&str, usize> = HashMap::new();
    for member in members {
        *sizes.entry(zone_key(&member.zone)).or_insert(0) += 1;
    }

    let mut quota: HashMap<&str, usize> = HashMap::new();
    for _ in 0..n {
        let Some((&zone, _)) = sizes
            .iter()
            .filter(|(_, size)| **size > 0)
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        else {
            break;
        };
        *quota.entry(zone).or_insert(0) += 1;
        if let Some(size) = sizes.get_mut(zone) {
            *size -= 1;
        }
    }

    let mut result = Vec::new();
    for (zone, count) in quota {
        let mut empties: Vec<&HostFootprint> = members
            .iter()
            .filter(|m| zone_key(&m.zone) == zone && m.container_count == 0)
            .collect();
        // Newest first: most recently provisioned, least sunk cost.
        empties.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.extend(empties.into_iter().take(count).map(|m| m.id.clone()));
    }

    // A zone quota can land on a zone with only busy hosts. Backfill from
    // empty hosts elsewhere so the caller gets as many as actually exist.
    if result.len() < n {
        let mut spares: Vec<&HostFootprint> = members
            .iter()
            .filter(|m| m.container_count == 0 && !result.contains(&m.id))
            .collect();
        spares.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.extend(
            spares
                .into_iter()
                .take(n - result.len())
                .map(|m| m.id.clone()),
        );
    }
    result
}
