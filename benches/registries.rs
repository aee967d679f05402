//! Benchmarks for the federation registries, placement and routing

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use storage_federation_gateway::config::{ClusterDescriptor, StaticConfigSource};
use storage_federation_gateway::federation::{
    Cluster, ClusterAllocator, ClusterRegistry, FederationConfig, FederationService, Resource,
    ResourceRegistry,
};
use storage_federation_gateway::{CallContext, VendorFactory};
use std::collections::BTreeMap;

fn bench_resource_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_registry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("map_single_resource", |b| {
        let registry = ResourceRegistry::new();
        let mut counter = 0u64;

        b.iter(|| {
            counter += 1;
            registry.map(black_box(Resource::volume(
                format!("vol-{}", counter),
                format!("cluster-{}", counter % 8),
            )));
        });
    });

    group.finish();
}

fn bench_resource_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("resource_registry");
    group.throughput(Throughput::Elements(1));

    // Pre-map resources
    let registry = ResourceRegistry::new();
    registry.map_all(
        (0..10_000).map(|i| Resource::volume(format!("vol-{:05}", i), format!("cluster-{}", i % 8))),
    );

    group.bench_function("get_resource_cluster", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let id = format!("vol-{:05}", counter % 10_000);
            let _ = registry.get_resource_cluster(black_box(&id));
        });
    });

    group.bench_function("get_resources_of_all_clusters", |b| {
        b.iter(|| black_box(registry.get_resources_of_all_clusters()));
    });

    group.finish();
}

fn bench_allocate_cluster(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator");
    group.throughput(Throughput::Elements(1));

    let registry = ClusterRegistry::new();
    for i in 0..64 {
        let region = if i % 2 == 0 { "us-east" } else { "us-west" };
        let descriptor =
            ClusterDescriptor::new(format!("cluster-{:02}", i), "memory").with_tag("region", region);
        registry.set(descriptor.cluster_id.clone(), Cluster::new(&descriptor, None));
    }
    let allocator = ClusterAllocator::with_seed(registry, 42);

    let mut east = BTreeMap::new();
    east.insert("region".to_string(), "us-east".to_string());
    let any = BTreeMap::new();

    group.bench_function("allocate_with_tags", |b| {
        b.iter(|| allocator.allocate_cluster(black_box(&east)));
    });
    group.bench_function("allocate_any", |b| {
        b.iter(|| allocator.allocate_cluster(black_box(&any)));
    });

    group.finish();
}

fn bench_routed_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("federation_service");
    group.throughput(Throughput::Elements(1));

    let source = StaticConfigSource::new(
        (0..4)
            .map(|i| ClusterDescriptor::new(format!("cluster-{}", i), "memory"))
            .collect(),
    );
    let service = FederationService::new(
        FederationConfig::default(),
        source,
        VendorFactory::with_defaults(),
    )
    .unwrap();
    let ctx = CallContext::new();

    let volume_id = tokio_test::block_on(async {
        service.reload(&ctx).await.unwrap();
        let request = storage_federation_gateway::CreateVolumeRequest {
            name: "bench".into(),
            size_bytes: 1 << 30,
            source: Default::default(),
            affinity_tags: BTreeMap::new(),
            labels: BTreeMap::new(),
        };
        service.create_volume(&ctx, &request).await.unwrap().id
    });

    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("get_volume", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = service.get_volume(&ctx, black_box(&volume_id)).await;
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_resource_map,
    bench_resource_lookup,
    bench_allocate_cluster,
    bench_routed_get,
);
criterion_main!(benches);
