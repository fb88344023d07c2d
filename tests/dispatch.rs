//! Integration tests for capability dispatch: layered lookup, precedence,
//! and resolution failure, all through the public API.

use std::sync::Arc;

use sprawl::artifact::{Isolate, Layer};
use sprawl::collector::{Collector, Template};
use sprawl::elements::MessageChain;
use sprawl::resolve::{DispatchError, PerformEnv, ResolutionError, Resolver};
use sprawl::selector::Selector;
use sprawl::standard::{MessageSend, SendMessage};

type BoxedSend =
    std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<Selector>> + Send>>;

/// A send perform that stamps the resulting message selector with `tag`,
/// so tests can see which registration won.
fn stamped(
    tag: &'static str,
) -> impl Fn(PerformEnv, SendMessage) -> BoxedSend + Send + Sync + 'static {
    move |_env, args| -> BoxedSend {
        Box::pin(async move { Ok(args.target.clone().message(tag)) })
    }
}

fn send_args(target: Selector) -> SendMessage {
    SendMessage {
        target,
        message: MessageChain::text("hello"),
        reply: None,
    }
}

async fn winner(resolver: &Resolver, target: Selector) -> Result<String, DispatchError> {
    let sent = resolver.call::<MessageSend>(send_args(target)).await?;
    Ok(sent.last_value().unwrap_or_default().to_owned())
}

#[tokio::test]
async fn longest_prefix_wins_within_a_layer() {
    let mut collector = Collector::new("scenario", Layer::Protocol, Template::empty());
    collector
        .collect::<MessageSend, _, _>("land.group", stamped("p1"))
        .expect("register p1");
    collector
        .collect::<MessageSend, _, _>("land.group.member", stamped("p2"))
        .expect("register p2");

    let mut isolate = Isolate::new();
    isolate.attach(collector).expect("attach");
    let resolver = Resolver::new(Arc::new(isolate));

    let member = Selector::new().land("qq").group("7").member("5");
    assert_eq!(winner(&resolver, member).await.expect("resolves"), "p2");

    let group = Selector::new().land("qq").group("9");
    assert_eq!(winner(&resolver, group).await.expect("resolves"), "p1");

    let user = Selector::new().land("qq").user("1");
    let err = winner(&resolver, user).await.expect_err("no registration");
    assert!(matches!(
        err,
        DispatchError::Resolution(ResolutionError::NoPerform { .. })
    ));
}

#[tokio::test]
async fn layer_precedence_outranks_specificity() {
    let mut protocol = Collector::new("protocol", Layer::Protocol, Template::empty());
    protocol
        .collect::<MessageSend, _, _>("land.group", stamped("protocol"))
        .expect("register");
    let mut application = Collector::new("application", Layer::Application, Template::empty());
    application
        .collect::<MessageSend, _, _>("land", stamped("application"))
        .expect("register");

    let mut isolate = Isolate::new();
    isolate.attach(protocol).expect("attach protocol");
    isolate.attach(application).expect("attach application");
    let resolver = Resolver::new(Arc::new(isolate));

    // The application layer's broad key beats the protocol layer's more
    // specific one.
    let target = Selector::new().land("qq").group("7");
    assert_eq!(winner(&resolver, target).await.expect("resolves"), "application");
}

#[tokio::test]
async fn detaching_the_shadowing_registration_reveals_the_lower_layer() {
    let mut protocol = Collector::new("protocol", Layer::Protocol, Template::empty());
    protocol
        .collect::<MessageSend, _, _>("land.group", stamped("below"))
        .expect("register");
    let mut application = Collector::new("application", Layer::Application, Template::empty());
    let token = application
        .collect::<MessageSend, _, _>("land.group", stamped("above"))
        .expect("register");

    let mut isolate = Isolate::new();
    isolate.attach(protocol).expect("attach protocol");
    isolate.attach(application).expect("attach application");

    let target = Selector::new().land("qq").group("7");
    let resolver = Resolver::new(Arc::new(isolate));
    assert_eq!(winner(&resolver, target.clone()).await.expect("resolves"), "above");

    // Rebuild without the shadowing registration; the lower layer shows
    // through again.
    let mut isolate = Isolate::new();
    let mut protocol = Collector::new("protocol", Layer::Protocol, Template::empty());
    protocol
        .collect::<MessageSend, _, _>("land.group", stamped("below"))
        .expect("register");
    let mut application = Collector::new("application", Layer::Application, Template::empty());
    application
        .collect::<MessageSend, _, _>("land.group", stamped("above"))
        .expect("register");
    isolate.attach(protocol).expect("attach protocol");
    isolate.attach(application).expect("attach application");
    assert!(isolate.detach(Layer::Application, &token));

    let resolver = Resolver::new(Arc::new(isolate));
    assert_eq!(winner(&resolver, target).await.expect("resolves"), "below");
}

#[tokio::test]
async fn resolution_failure_is_independent_of_build_order() {
    let build = |first_protocol: bool| {
        let mut isolate = Isolate::new();
        let mut protocol = Collector::new("protocol", Layer::Protocol, Template::empty());
        protocol
            .collect::<MessageSend, _, _>("land.group", stamped("protocol"))
            .expect("register");
        let mut application = Collector::new("application", Layer::Application, Template::empty());
        application
            .collect::<MessageSend, _, _>("land.user", stamped("application"))
            .expect("register");
        if first_protocol {
            isolate.attach(protocol).expect("attach");
            isolate.attach(application).expect("attach");
        } else {
            isolate.attach(application).expect("attach");
            isolate.attach(protocol).expect("attach");
        }
        Resolver::new(Arc::new(isolate))
    };

    let target = Selector::new().push("station", "alpha");
    let first = winner(&build(true), target.clone())
        .await
        .expect_err("unregistered root");
    let second = winner(&build(false), target)
        .await
        .expect_err("unregistered root");
    assert_eq!(first.to_string(), second.to_string());
}

#[tokio::test]
async fn resolve_exposes_the_chosen_registration() {
    let mut collector = Collector::new("introspect", Layer::Protocol, Template::empty());
    collector
        .collect::<MessageSend, _, _>("land.group", stamped("x"))
        .expect("register");
    let mut isolate = Isolate::new();
    isolate.attach(collector).expect("attach");

    let resolver = Resolver::new(Arc::new(isolate));
    let args = send_args(Selector::new().land("qq").group("1").member("2"));
    let resolved = resolver.resolve::<MessageSend>(&args).expect("resolves");
    assert_eq!(resolved.token().capability(), "message::send");
    assert_eq!(resolved.token().pattern().to_string(), "land.group");
    assert_eq!(resolved.token().collector(), "introspect");
}
