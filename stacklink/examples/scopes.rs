//! Walks through the ownership topologies with tracing enabled.
//!
//! ```text
//! RUST_LOG=stacklink=trace cargo run --example scopes
//! ```

use std::pin::{Pin, pin};
use std::thread;

use stacklink::{HybridPtr, StateKind, stats};
use tracing_subscriber::EnvFilter;

struct Node {
    name: &'static str,
    value: HybridPtr<String>,
}

fn show(label: &str, handle: &HybridPtr<String>) {
    println!(
        "{label:<24} {:<10} dependents={} shared_count={:?}",
        format!("{:?}", handle.kind()),
        handle.dependents(),
        handle.shared_count()
    );
}

#[inline(never)]
fn print_through_copy(source: Pin<&mut HybridPtr<String>>) {
    let mut copy = pin!(HybridPtr::<String>::vacant());
    copy.as_mut().attach(source).expect("attach");
    show("  copy in callee", &copy);
    println!("  value: {}", copy.as_str());
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if stacklink::ThreadStack.bounds().is_none() {
        println!("stack bounds unavailable here, every copy will be shared");
    }

    println!("== stack root with nested copies");
    {
        let mut root = pin!(HybridPtr::new(String::from("on the stack")));
        print_through_copy(root.as_mut());
        show("root", &root);
    }

    println!("== heap owner with a stack copy");
    {
        let mut node = Box::pin(Node {
            name: "node",
            value: HybridPtr::new(String::from("in a heap struct")),
        });
        // SAFETY: `value` is never moved out of the pinned node.
        let mut value = unsafe { node.as_mut().map_unchecked_mut(|n| &mut n.value) };
        let mut copy = pin!(HybridPtr::<String>::vacant());
        copy.as_mut().attach(value.as_mut()).expect("attach");
        show(node.name, &node.value);
        show("stack copy", &copy);

        drop(node);
        show("stack copy after drop", &copy);
        assert_eq!(copy.kind(), StateKind::Owning);
    }

    println!("== sharing across threads");
    {
        let mut root = pin!(HybridPtr::new(String::from("escaped")));
        let token = root.as_mut().escape().expect("escape");
        show("root", &root);
        thread::spawn(move || {
            let remote = HybridPtr::from_escaped(token);
            show("remote", &remote);
        })
        .join()
        .expect("worker");
    }

    println!("== {:?}", stats::global());
}
