//! Tests for outbound resource templates and argument merging

use std::collections::HashMap;

use serde_json::{json, Value};
use switchboard::error::{ArgumentError, RegistryError};
use switchboard::http::request::Method;
use switchboard::outbound::{ConnectionDef, Registry, Resource};

fn kwargs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn registry_with_document() -> Registry {
    let mut def = ConnectionDef::new("remote", url::Url::parse("http://10.0.0.1:8080").unwrap());
    let mut resource = Resource::new("document", "/posts/{id}", Method::GET);
    resource.required("first_name");
    resource.optional("planet", json!("earth"));
    def.add_resource(resource);

    let mut registry = Registry::new();
    registry.add(def);
    registry
}

#[test]
fn test_positionals_fill_path_then_required() {
    let registry = registry_with_document();
    let call = registry.resource("remote", "document").unwrap();

    let request = call
        .build_request(vec![json!(1), json!(2)], HashMap::new())
        .unwrap();

    assert_eq!(request.method, Method::GET);
    assert_eq!(request.addr, "10.0.0.1:8080");
    assert_eq!(request.host, "10.0.0.1:8080");
    // path placeholder consumed first, then REQUIRED, then the default
    assert_eq!(request.target, "/posts/1?first_name=2&planet=earth");
}

#[test]
fn test_keyword_satisfies_required() {
    let registry = registry_with_document();
    let call = registry.resource("remote", "document").unwrap();

    let request = call
        .build_request(vec![json!(1)], kwargs(&[("first_name", json!("ada"))]))
        .unwrap();

    assert_eq!(request.target, "/posts/1?first_name=ada&planet=earth");
}

#[test]
fn test_keyword_overrides_optional_default() {
    let registry = registry_with_document();
    let call = registry.resource("remote", "document").unwrap();

    let request = call
        .build_request(vec![json!(1), json!(2)], kwargs(&[("planet", json!("mars"))]))
        .unwrap();

    assert_eq!(request.target, "/posts/1?first_name=2&planet=mars");
}

#[test]
fn test_missing_required_fails_before_io() {
    let registry = registry_with_document();
    let call = registry.resource("remote", "document").unwrap();

    let err = call.build_request(vec![json!(1)], HashMap::new()).unwrap_err();

    assert_eq!(err, ArgumentError::MissingRequired("first_name".to_string()));
}

#[test]
fn test_missing_path_param_fails() {
    let registry = registry_with_document();
    let call = registry.resource("remote", "document").unwrap();

    let err = call.build_request(vec![], HashMap::new()).unwrap_err();

    assert_eq!(err, ArgumentError::MissingPathParam("id".to_string()));
}

#[test]
fn test_surplus_arguments_fail() {
    let registry = registry_with_document();
    let call = registry.resource("remote", "document").unwrap();

    let err = call
        .build_request(vec![json!(1), json!(2), json!(3)], HashMap::new())
        .unwrap_err();
    assert_eq!(err, ArgumentError::UnexpectedPositional);

    let err = call
        .build_request(vec![json!(1), json!(2)], kwargs(&[("stray", json!(true))]))
        .unwrap_err();
    assert_eq!(err, ArgumentError::UnexpectedKeyword("stray".to_string()));
}

#[test]
fn test_post_parameters_become_json_body() {
    let mut def = ConnectionDef::new("remote", url::Url::parse("http://api.local").unwrap());
    let mut resource = Resource::new("create", "/posts", Method::POST);
    resource.required("title");
    def.add_resource(resource);
    let mut registry = Registry::new();
    registry.add(def);

    let call = registry.resource("remote", "create").unwrap();
    let request = call
        .build_request(vec![json!("hello")], HashMap::new())
        .unwrap();

    assert_eq!(request.target, "/posts");
    assert_eq!(request.host, "api.local");
    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body, json!({"title": "hello"}));
    assert_eq!(
        request.headers.get("Content-Type").unwrap(),
        "application/json; charset=utf-8"
    );
}

#[test]
fn test_base_url_path_prefixes_target() {
    let mut def = ConnectionDef::new("remote", url::Url::parse("http://api.local/v2/").unwrap());
    def.add_resource(Resource::new("ping", "/ping", Method::GET));
    let mut registry = Registry::new();
    registry.add(def);

    let call = registry.resource("remote", "ping").unwrap();
    let request = call.build_request(vec![], HashMap::new()).unwrap();

    assert_eq!(request.target, "/v2/ping");
}

#[test]
fn test_default_headers_merge_with_resource_overrides() {
    let mut def = ConnectionDef::new("remote", url::Url::parse("http://api.local").unwrap());
    def.header("x-api-key", "hunter2");
    def.header("accept", "application/json");
    let mut resource = Resource::new("plain", "/plain", Method::GET);
    resource.header("accept", "text/plain");
    def.add_resource(resource);
    let mut registry = Registry::new();
    registry.add(def);

    let call = registry.resource("remote", "plain").unwrap();
    let request = call.build_request(vec![], HashMap::new()).unwrap();

    // connection defaults carry over, resource headers win on conflict
    assert_eq!(request.headers.get("x-api-key").unwrap(), "hunter2");
    assert_eq!(request.headers.get("accept").unwrap(), "text/plain");
}

#[test]
fn test_repeated_placeholder_consumes_one_positional_each() {
    let mut def = ConnectionDef::new("remote", url::Url::parse("http://api.local").unwrap());
    def.add_resource(Resource::new("pair", "/pair/{x}/{x}", Method::GET));
    let mut registry = Registry::new();
    registry.add(def);

    let call = registry.resource("remote", "pair").unwrap();
    let request = call
        .build_request(vec![json!(1), json!(2)], HashMap::new())
        .unwrap();

    assert_eq!(request.target, "/pair/1/2");
}

#[test]
fn test_unknown_names_are_lookup_errors() {
    let registry = registry_with_document();

    assert_eq!(
        registry.resource("nope", "document").unwrap_err(),
        RegistryError::UnknownConnection("nope".to_string())
    );
    assert_eq!(
        registry.resource("remote", "nope").unwrap_err(),
        RegistryError::UnknownResource("remote".to_string(), "nope".to_string())
    );
}
