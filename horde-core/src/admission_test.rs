#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use crate::admission::{AdmissionEngine, AdmissionResult, RejectReason};
    use crate::types::{
        AgentCapabilities, AgentLease, AgentLeaseDevice, AgentRequirements, DeviceCapabilities,
        DeviceRequirements, LeasePayload,
    };

    // =========================================================================
    // Helpers
    // =========================================================================
    fn lease(id: &str, devices: Vec<AgentLeaseDevice>) -> AgentLease {
        AgentLease::new(
            id.to_string(),
            id.to_string(),
            LeasePayload::default(),
            devices,
            1000,
        )
    }

    fn shared_claim(index: usize, name: &str, amount: i32) -> AgentLeaseDevice {
        AgentLeaseDevice {
            index,
            handle: format!("dev{}", index),
            resources: Some(BTreeMap::from([(name.to_string(), amount)])),
        }
    }

    fn exclusive_claim(index: usize) -> AgentLeaseDevice {
        AgentLeaseDevice {
            index,
            handle: format!("dev{}", index),
            resources: None,
        }
    }

    fn gpu_agent(capacity: i32) -> AgentCapabilities {
        AgentCapabilities::single(DeviceCapabilities::new("Primary").with_resource("gpu", capacity))
    }

    fn gpu_request(amount: i32) -> AgentRequirements {
        AgentRequirements::shared().with_device(DeviceRequirements::default().with_resource("gpu", amount))
    }

    // =========================================================================
    // Top-level gates
    // =========================================================================

    #[test]
    fn no_requirements_admits_without_devices() {
        let caps = gpu_agent(1);
        let existing = vec![lease("busy", vec![exclusive_claim(0)])];
        assert_eq!(
            AdmissionEngine::try_create_lease(&caps, None, &existing),
            Some(Vec::new())
        );
    }

    #[test]
    fn exclusive_request_rejected_when_agent_has_any_lease() {
        let caps = gpu_agent(8);
        let existing = vec![lease("other", vec![])];
        let requirements = AgentRequirements::default();

        assert_eq!(
            AdmissionEngine::check(&caps, Some(&requirements), &existing),
            AdmissionResult::Rejected {
                reason: RejectReason::ExclusiveAgentBusy
            }
        );
    }

    #[test]
    fn exclusive_request_admitted_on_idle_agent() {
        let caps = gpu_agent(8);
        let requirements = AgentRequirements::default();
        assert_eq!(
            AdmissionEngine::try_create_lease(&caps, Some(&requirements), &[]),
            Some(Vec::new())
        );
    }

    #[test]
    fn missing_agent_property_rejects() {
        let mut caps = gpu_agent(1);
        caps.properties = Some(["OSFamily=Windows".to_string()].into());

        let ok = AgentRequirements::shared().with_property("OSFamily=Windows");
        assert!(AdmissionEngine::check(&caps, Some(&ok), &[]).is_admitted());

        let missing = AgentRequirements::shared().with_property("OSFamily=Linux");
        assert_eq!(
            AdmissionEngine::check(&caps, Some(&missing), &[]),
            AdmissionResult::Rejected {
                reason: RejectReason::MissingProperty("OSFamily=Linux".to_string())
            }
        );
    }

    #[test]
    fn device_properties_do_not_count_as_agent_properties() {
        let caps = AgentCapabilities::single(DeviceCapabilities::new("Primary").with_properties(["X"]));
        let requirements = AgentRequirements::shared().with_property("X");
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&requirements), &[]).is_none());
    }

    #[test]
    fn empty_device_list_admits_without_devices() {
        let caps = gpu_agent(1);
        let requirements = AgentRequirements {
            devices: Some(Vec::new()),
            shared: true,
            ..AgentRequirements::default()
        };
        assert_eq!(
            AdmissionEngine::try_create_lease(&caps, Some(&requirements), &[]),
            Some(Vec::new())
        );
    }

    // =========================================================================
    // Shared capacity
    // =========================================================================

    #[test]
    fn shared_gpu_scenario() {
        let caps = gpu_agent(2);
        let mut leases = Vec::new();

        // A takes one of two
        let a = AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(1)), &leases)
            .expect("lease A should fit");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].index, 0);
        assert_eq!(a[0].handle, "Primary");
        assert_eq!(a[0].claimed("gpu"), 1);
        leases.push(lease("a", a));

        // B wants two, only one left
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(2)), &leases).is_none());

        // C takes the last one
        let c = AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(1)), &leases)
            .expect("lease C should fit");
        leases.push(lease("c", c));

        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(1)), &leases).is_none());
    }

    #[test]
    fn shared_request_on_uncountable_device_rejected() {
        let caps = AgentCapabilities::single(DeviceCapabilities::new("Primary"));
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(1)), &[]).is_none());
    }

    #[test]
    fn resource_missing_from_device_counts_as_zero_capacity() {
        let caps = gpu_agent(4);
        let requirements = AgentRequirements::shared()
            .with_device(DeviceRequirements::default().with_resource("license", 1));
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&requirements), &[]).is_none());
    }

    #[test]
    fn zero_amount_claim_fits_a_full_device() {
        let caps = gpu_agent(1);
        let existing = vec![lease("full", vec![shared_claim(0, "gpu", 1)])];
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(0)), &existing).is_some());
    }

    #[test]
    fn negative_amount_never_matches() {
        let caps = gpu_agent(1);
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(-3)), &[]).is_none());

        // A stray negative claim must not free capacity for later requests
        let existing = vec![lease("stray", vec![shared_claim(0, "gpu", -3)])];
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(4)), &existing).is_none());
    }

    // =========================================================================
    // Exclusive / shared interaction on one device
    // =========================================================================

    #[test]
    fn exclusive_holder_blocks_everything() {
        let caps = gpu_agent(4);
        let existing = vec![lease("holder", vec![exclusive_claim(0)])];

        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(1)), &existing).is_none());

        let whole = AgentRequirements::shared().with_device(DeviceRequirements::exclusive());
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&whole), &existing).is_none());
    }

    #[test]
    fn shared_holder_blocks_exclusive_claim() {
        let caps = gpu_agent(4);
        let existing = vec![lease("holder", vec![shared_claim(0, "gpu", 1)])];

        let whole = AgentRequirements::shared().with_device(DeviceRequirements::exclusive());
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&whole), &existing).is_none());
        assert!(AdmissionEngine::try_create_lease(&caps, Some(&gpu_request(3)), &existing).is_some());
    }

    #[test]
    fn leases_on_other_devices_do_not_interfere() {
        let caps = AgentCapabilities::new(
            vec![
                DeviceCapabilities::new("Primary"),
                DeviceCapabilities::new("Console"),
            ],
            None,
        )
        .unwrap();
        let existing = vec![lease("host", vec![exclusive_claim(0)])];
        let whole = AgentRequirements::shared().with_device(DeviceRequirements::exclusive());

        assert_eq!(caps.primary_device().unwrap().handle, "Primary");
        let devices = AdmissionEngine::try_create_lease(&caps, Some(&whole), &existing).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].index, 1);
        assert_eq!(devices[0].handle, "Console");
    }

    // =========================================================================
    // Backtracking matcher
    // =========================================================================

    #[test]
    fn two_requirements_one_qualifying_device_fails() {
        let caps = AgentCapabilities::new(
            vec![
                DeviceCapabilities::new("Primary"),
                DeviceCapabilities::new("DevKit").with_properties(["X"]),
            ],
            None,
        )
        .unwrap();
        let requirements = AgentRequirements::shared()
            .with_device(DeviceRequirements::exclusive().with_property("X"))
            .with_device(DeviceRequirements::exclusive().with_property("X"));

        assert_eq!(
            AdmissionEngine::check(&caps, Some(&requirements), &[]),
            AdmissionResult::Rejected {
                reason: RejectReason::NoDeviceMatch
            }
        );
    }

    #[test]
    fn backtracks_when_greedy_choice_starves_a_later_requirement() {
        // Device 0 has A and B, device 1 only A. Greedy picks 0 for the A
        // requirement and leaves nothing for B.
        let caps = AgentCapabilities::new(
            vec![
                DeviceCapabilities::new("d0").with_properties(["A", "B"]),
                DeviceCapabilities::new("d1").with_properties(["A"]),
            ],
            None,
        )
        .unwrap();
        let requirements = AgentRequirements::shared()
            .with_device(DeviceRequirements::exclusive().with_handle("first").with_property("A"))
            .with_device(DeviceRequirements::exclusive().with_handle("second").with_property("B"));

        let devices = AdmissionEngine::try_create_lease(&caps, Some(&requirements), &[]).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!((devices[0].index, devices[0].handle.as_str()), (1, "first"));
        assert_eq!((devices[1].index, devices[1].handle.as_str()), (0, "second"));
    }

    #[test]
    fn picks_lowest_free_index_first() {
        let caps = AgentCapabilities::new(
            (0..4).map(|i| DeviceCapabilities::new(format!("d{}", i))).collect(),
            None,
        )
        .unwrap();
        let existing = vec![lease("x", vec![exclusive_claim(0), exclusive_claim(2)])];
        let requirements = AgentRequirements::shared()
            .with_device(DeviceRequirements::exclusive())
            .with_device(DeviceRequirements::exclusive());

        let indices: Vec<usize> = AdmissionEngine::try_create_lease(&caps, Some(&requirements), &existing)
            .unwrap()
            .iter()
            .map(|d| d.index)
            .collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn searches_past_thirty_two_devices() {
        let mut devices: Vec<DeviceCapabilities> =
            (0..40).map(|i| DeviceCapabilities::new(format!("d{}", i))).collect();
        devices[39] = DeviceCapabilities::new("last").with_properties(["Rare"]);
        let caps = AgentCapabilities::new(devices, None).unwrap();
        let requirements =
            AgentRequirements::shared().with_device(DeviceRequirements::exclusive().with_property("Rare"));

        let granted = AdmissionEngine::try_create_lease(&caps, Some(&requirements), &[]).unwrap();
        assert_eq!(granted[0].index, 39);
    }

    #[test]
    fn granted_indices_are_distinct() {
        let caps = AgentCapabilities::new(
            (0..3)
                .map(|i| DeviceCapabilities::new(format!("d{}", i)).with_resource("slots", 10))
                .collect(),
            None,
        )
        .unwrap();
        let requirements = AgentRequirements::shared()
            .with_device(DeviceRequirements::default().with_resource("slots", 1))
            .with_device(DeviceRequirements::default().with_resource("slots", 1))
            .with_device(DeviceRequirements::default().with_resource("slots", 1));

        let mut indices: Vec<usize> = AdmissionEngine::try_create_lease(&caps, Some(&requirements), &[])
            .unwrap()
            .iter()
            .map(|d| d.index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 3);
    }

    #[test]
    fn empty_capabilities_are_rejected_at_construction() {
        assert!(AgentCapabilities::new(Vec::new(), None).is_err());
    }

    #[test]
    fn empty_capabilities_are_rejected_when_decoded() {
        let decoded = serde_json::from_str::<AgentCapabilities>(r#"{ "devices": [] }"#);
        assert!(decoded.is_err());

        let agent = serde_json::from_str::<crate::types::Agent>(
            r#"{ "id": "a", "enabled": true, "status": "Ok", "capabilities": { "devices": [] } }"#,
        );
        assert!(agent.is_err());

        let caps: AgentCapabilities = serde_json::from_str(
            r#"{ "devices": [ { "handle": "Primary" } ], "properties": ["OSFamily=Linux"] }"#,
        )
        .unwrap();
        assert!(caps.has_property("OSFamily=Linux"));
    }

    // =========================================================================
    // Properties
    // =========================================================================

    const PROPS: [&str; 2] = ["A", "B"];

    fn arb_device() -> impl Strategy<Value = DeviceCapabilities> {
        (
            prop::collection::vec(any::<bool>(), 2),
            prop::option::of(0..4i32),
        )
            .prop_map(|(flags, gpu)| {
                let mut device = DeviceCapabilities::new("d").with_properties(
                    PROPS.iter().zip(flags).filter(|(_, on)| *on).map(|(p, _)| *p),
                );
                if let Some(gpu) = gpu {
                    device = device.with_resource("gpu", gpu);
                }
                device
            })
    }

    fn arb_requirement() -> impl Strategy<Value = DeviceRequirements> {
        (
            prop::collection::vec(any::<bool>(), 2),
            prop::option::of(-1..3i32),
        )
            .prop_map(|(flags, gpu)| {
                let mut requirement = DeviceRequirements::exclusive();
                for (p, on) in PROPS.iter().zip(flags) {
                    if on {
                        requirement = requirement.with_property(*p);
                    }
                }
                if let Some(gpu) = gpu {
                    requirement = requirement.with_resource("gpu", gpu);
                }
                requirement
            })
    }

    fn arb_existing(device_count: usize) -> impl Strategy<Value = Vec<AgentLeaseDevice>> {
        prop::collection::vec(
            (0..device_count, prop::option::of(0..3i32)),
            0..3,
        )
        .prop_map(|claims| {
            claims
                .into_iter()
                .map(|(index, gpu)| match gpu {
                    Some(gpu) => shared_claim(index, "gpu", gpu),
                    None => exclusive_claim(index),
                })
                .collect()
        })
    }

    /// Independent restatement of the per-device rules.
    fn device_fits(
        device: &DeviceCapabilities,
        requirement: &DeviceRequirements,
        held: &[&AgentLeaseDevice],
    ) -> bool {
        let has = |p: &String| device.properties.as_ref().is_some_and(|set| set.contains(p));
        if !requirement.properties.iter().flatten().all(has) {
            return false;
        }
        let Some(wanted) = &requirement.resources else {
            return held.is_empty();
        };
        let Some(capacity) = &device.resources else {
            return false;
        };
        if held.iter().any(|claim| claim.resources.is_none()) {
            return false;
        }
        wanted.iter().all(|(name, amount)| {
            let taken: i64 = held
                .iter()
                .filter_map(|claim| claim.resources.as_ref()?.get(name))
                .map(|n| i64::from(*n))
                .sum();
            let total = i64::from(capacity.get(name).copied().unwrap_or(0));
            *amount >= 0 && total - taken >= i64::from(*amount)
        })
    }

    /// Every injective mapping of `len` requirements onto device indices,
    /// in lexicographic order.
    fn assignments(device_count: usize, len: usize) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new()];
        for _ in 0..len {
            let mut next = Vec::new();
            for prefix in &out {
                for index in (0..device_count).filter(|i| !prefix.contains(i)) {
                    let mut extended = prefix.clone();
                    extended.push(index);
                    next.push(extended);
                }
            }
            out = next;
        }
        out
    }

    fn exhaustive_first_fit(
        caps: &AgentCapabilities,
        required: &[DeviceRequirements],
        existing: &[AgentLease],
    ) -> Option<Vec<usize>> {
        assignments(caps.devices.len(), required.len())
            .into_iter()
            .find(|assignment| {
                assignment.iter().zip(required).all(|(&index, requirement)| {
                    let held: Vec<&AgentLeaseDevice> =
                        existing.iter().flat_map(|l| l.devices_on(index)).collect();
                    device_fits(&caps.devices[index], requirement, &held)
                })
            })
    }

    #[test]
    fn assignments_are_injective_and_ordered() {
        assert_eq!(
            assignments(3, 2),
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![1, 0],
                vec![1, 2],
                vec![2, 0],
                vec![2, 1],
            ]
        );
        assert!(assignments(2, 3).is_empty());
    }

    proptest! {
        #[test]
        fn exclusive_requests_never_coexist(
            device in arb_device(),
            requirement in prop::option::of(arb_requirement()),
        ) {
            let caps = AgentCapabilities::single(device);
            let requirements = AgentRequirements {
                devices: requirement.map(|r| vec![r]),
                shared: false,
                ..AgentRequirements::default()
            };
            let existing = vec![lease("other", vec![])];
            prop_assert!(AdmissionEngine::try_create_lease(&caps, Some(&requirements), &existing).is_none());
        }

        #[test]
        fn shared_claims_never_exceed_capacity(
            capacities in prop::collection::vec(0..5i32, 1..4),
            requests in prop::collection::vec((-2..4i32, 1..3usize), 1..12),
        ) {
            let caps = AgentCapabilities::new(
                capacities
                    .iter()
                    .enumerate()
                    .map(|(i, c)| DeviceCapabilities::new(format!("d{}", i)).with_resource("gpu", *c))
                    .collect(),
                None,
            )
            .unwrap();

            let mut leases: Vec<AgentLease> = Vec::new();
            for (n, (amount, count)) in requests.into_iter().enumerate() {
                let mut requirements = AgentRequirements::shared();
                for _ in 0..count {
                    requirements = requirements
                        .with_device(DeviceRequirements::default().with_resource("gpu", amount));
                }
                if let Some(devices) = AdmissionEngine::try_create_lease(&caps, Some(&requirements), &leases) {
                    leases.push(lease(&format!("l{}", n), devices));
                }

                for (index, capacity) in capacities.iter().enumerate() {
                    let used: i32 = leases
                        .iter()
                        .flat_map(|l| l.devices_on(index))
                        .map(|d| d.claimed("gpu"))
                        .sum();
                    prop_assert!(used <= *capacity, "device {} over capacity: {} > {}", index, used, capacity);
                }
            }
        }

        #[test]
        fn matcher_picks_first_exhaustive_assignment(
            devices in prop::collection::vec(arb_device(), 1..5),
            required in prop::collection::vec(arb_requirement(), 1..4),
            claims in arb_existing(4),
        ) {
            let device_count = devices.len();
            let caps = AgentCapabilities::new(devices, None).unwrap();
            let claims: Vec<AgentLeaseDevice> =
                claims.into_iter().filter(|c| c.index < device_count).collect();
            let existing = if claims.is_empty() { Vec::new() } else { vec![lease("held", claims)] };
            let requirements = AgentRequirements {
                devices: Some(required.clone()),
                shared: true,
                ..AgentRequirements::default()
            };

            let expected = exhaustive_first_fit(&caps, &required, &existing);
            let granted = AdmissionEngine::try_create_lease(&caps, Some(&requirements), &existing);
            let granted_indices = granted.map(|devices| devices.iter().map(|d| d.index).collect::<Vec<_>>());
            prop_assert_eq!(granted_indices, expected);
        }
    }
}
