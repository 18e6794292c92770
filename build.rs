use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str, streaming: bool) -> Method {
    let builder = Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::wire::{input}"))
        .output_type(format!("crate::wire::{output}"))
        .codec_path(CODEC);

    if streaming {
        builder.client_streaming().build()
    } else {
        builder.build()
    }
}

fn main() {
    // Messages are hand-maintained prost structs in src/wire, so only the
    // service glue is generated here. No protoc is needed.
    let collector = Service::builder()
        .name("CollectorService")
        .package("org.glowroot.wire.api.model")
        .method(method(
            "collect_init",
            "CollectInit",
            "InitMessage",
            "InitResponse",
            false,
        ))
        .method(method(
            "collect_aggregate_stream",
            "CollectAggregateStream",
            "AggregateStreamMessage",
            "AggregateResponseMessage",
            true,
        ))
        .method(method(
            "collect_aggregates",
            "CollectAggregates",
            "OldAggregateMessage",
            "AggregateResponseMessage",
            false,
        ))
        .method(method(
            "collect_gauge_values",
            "CollectGaugeValues",
            "GaugeValueMessage",
            "EmptyMessage",
            false,
        ))
        .method(method(
            "collect_trace_stream",
            "CollectTraceStream",
            "TraceStreamMessage",
            "EmptyMessage",
            true,
        ))
        .method(method(
            "collect_trace",
            "CollectTrace",
            "OldTraceMessage",
            "EmptyMessage",
            false,
        ))
        .method(method("log", "Log", "LogMessage", "EmptyMessage", false))
        .build();

    Builder::new().compile(&[collector]);

    println!("cargo:rerun-if-changed=build.rs");
}
