fn decide_with_obligations(
    clearance: &str,
    client_id: Option<&str>,
    fulfillable: &[&str],
) -> Decision {
    let pdp = pdp();
    let resources = [resource("doc", &[fqn("classification", "s")])];
    let mut decision = pdp
        .get_decision(&entity(json!({ "clearance": clearance })), &read(), &resources)
        .unwrap();
    let fulfillable: Vec<String> = fulfillable.iter().map(|f| f.to_string()).collect();
    pdp.apply_obligations(&mut decision, &read(), &resources, client_id, &fulfillable)
        .unwrap();
    decision
}

#[test]
fn test_unfulfilled_obligation_denies() {
    let decision = decide_with_obligations("S", Some("alpha"), &[]);
    let result = &decision.results[0];
    assert!(result.entitled);
    assert!(!result.obligations_satisfied);
    assert!(!result.passed);
    assert!(!decision.all_permitted);
    assert_eq!(result.required_obligations, vec![PREVENT_PRINT.to_string()]);
}

#[parameterized(
    exact = { PREVENT_PRINT },
    upper_case = { "HTTPS://EXAMPLE.COM/OBL/DRM/VALUE/PREVENT_PRINT" },
)]
fn test_fulfilled_obligation_permits(fulfillable: &str) {
    let decision = decide_with_obligations("S", Some("alpha"), &[fulfillable]);
    assert!(decision.all_permitted);
    assert_eq!(
        decision.results[0].required_obligations,
        vec![PREVENT_PRINT.to_string()]
    );
}

#[parameterized(
    other_client = { Some("beta") },
    no_client = { None },
)]
fn test_client_scoped_trigger_does_not_fire(client_id: Option<&str>) {
    let decision = decide_with_obligations("S", client_id, &[]);
    assert!(decision.all_permitted);
    assert!(decision.results[0].required_obligations.is_empty());
}

#[test]
fn test_obligations_reported_on_deny() {
    let decision = decide_with_obligations("C", Some("alpha"), &[PREVENT_PRINT]);
    let result = &decision.results[0];
    assert!(!result.entitled);
    assert!(!result.passed);
    assert_eq!(result.required_obligations, vec![PREVENT_PRINT.to_string()]);
}

#[test]
fn test_obligations_through_registered_resource() {
    let pdp = pdp();
    let resources = [Resource::registered("net", RR_INTERNAL)];
    let mut decision = pdp
        .get_decision(
            &entity(json!({ "clearance": "S", "country": "USA" })),
            &read(),
            &resources,
        )
        .unwrap();
    pdp.apply_obligations(&mut decision, &read(), &resources, Some("alpha"), &[])
        .unwrap();
    assert_eq!(
        decision.results[0].required_obligations,
        vec![PREVENT_PRINT.to_string()]
    );
    assert!(!decision.all_permitted);
}

#[test]
fn test_apply_obligations_length_mismatch() {
    let pdp = pdp();
    let mut decision = pdp
        .get_decision(
            &entity(json!({ "clearance": "S" })),
            &read(),
            &[resource("doc", &[fqn("classification", "s")])],
        )
        .unwrap();
    let err = pdp
        .apply_obligations(&mut decision, &read(), &[], Some("alpha"), &[])
        .unwrap_err();
    assert!(matches!(err, AuthzError::Consolidation(_)));
}
