//! End-to-end planning scenarios: operation in, fetch configurations out.

use std::sync::Arc;

use federation_planner::FederationFieldConfiguration;
use federation_planner::FederationFieldConfigurations;
use federation_planner::FederationMetadata;
use federation_planner::GraphqlPlannerFactory;
use federation_planner::PlanError;
use federation_planner::Planner;
use federation_planner::PlannerOptions;
use federation_planner::SubgraphDescriptor;
use federation_planner::TypeField;
use federation_planner::TypeFields;
use federation_planner::fetch::PlannerConfiguration;
use federation_planner::fetch::PlannerPathType;
use federation_planner::operation::OperationDocument;
use federation_planner::operation::OperationKind;
use federation_planner::operation::Selection;
use federation_planner::planner::QueryPlan;
use federation_planner::schema::SchemaDocument;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn type_fields(entries: &[(&str, &[&str], &[&str])]) -> TypeFields {
    TypeFields::new(
        entries
            .iter()
            .map(|(type_name, fields, external)| TypeField {
                type_name: (*type_name).to_string(),
                field_names: fields.iter().map(|f| f.to_string()).collect(),
                external_field_names: external.iter().map(|f| f.to_string()).collect(),
            })
            .collect(),
    )
}

fn metadata(
    keys: &[FederationFieldConfiguration],
    requires: &[FederationFieldConfiguration],
    provides: &[FederationFieldConfiguration],
) -> FederationMetadata {
    FederationMetadata {
        keys: FederationFieldConfigurations::new(keys.to_vec()),
        requires: FederationFieldConfigurations::new(requires.to_vec()),
        provides: FederationFieldConfigurations::new(provides.to_vec()),
        ..FederationMetadata::default()
    }
}

fn subgraph(
    id: &str,
    root_nodes: &[(&str, &[&str], &[&str])],
    child_nodes: &[(&str, &[&str], &[&str])],
    metadata: FederationMetadata,
    schema: SchemaDocument,
) -> SubgraphDescriptor {
    SubgraphDescriptor::new(
        id,
        type_fields(root_nodes),
        type_fields(child_nodes),
        metadata,
        schema,
        Arc::new(GraphqlPlannerFactory),
    )
}

fn plan(
    subgraphs: Vec<SubgraphDescriptor>,
    schema: &SchemaDocument,
    doc: &mut OperationDocument,
) -> QueryPlan {
    let planner = Planner::new(subgraphs, PlannerOptions::default()).unwrap();
    planner.plan(doc, schema, None).unwrap()
}

fn paths_of(planner: &PlannerConfiguration) -> Vec<&str> {
    planner.paths.iter().map(|p| p.path.as_str()).collect()
}

#[test]
fn single_subgraph_operation_becomes_one_fetch() {
    let schema = SchemaDocument::builder()
        .object("User", &[("id", "ID"), ("name", "String")])
        .object("Query", &[("me", "User")])
        .build();
    let users = subgraph(
        "users",
        &[("Query", &["me"], &[])],
        &[("User", &["id", "name"], &[])],
        FederationMetadata::default(),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let name = doc.add_field("name", None, None);
    let me_set = doc.add_selection_set(vec![Selection::Field(name)]);
    let me = doc.add_field("me", None, Some(me_set));
    let root = doc.add_selection_set(vec![Selection::Field(me)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![users], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 1);
    let fetch = &plan.planners[0];
    assert_eq!(fetch.subgraph_id, "users");
    assert_eq!(fetch.parent_path, "query");
    assert!(!fetch.is_nested);
    assert_eq!(fetch.path_type, PlannerPathType::Object);
    assert!(fetch.depends_on_fetch_ids.is_empty());
    assert!(fetch.required_fields.is_empty());
    assert_eq!(paths_of(fetch), vec!["query", "query.me", "query.me.name"]);
    assert!(plan.skip_fields.is_empty());
    assert_eq!(plan.passes.selection, 1);
    assert_eq!(plan.passes.assembly, 1);
}

fn reviews_schema() -> SchemaDocument {
    SchemaDocument::builder()
        .object(
            "User",
            &[("id", "ID"), ("name", "String"), ("reviews", "[Review]")],
        )
        .object("Review", &[("body", "String")])
        .object("Query", &[("me", "User")])
        .build()
}

fn users_and_reviews() -> Vec<SubgraphDescriptor> {
    let schema = reviews_schema();
    let users = subgraph(
        "users",
        &[("Query", &["me"], &[])],
        &[("User", &["id", "name"], &[])],
        metadata(&[FederationFieldConfiguration::key("User", "id")], &[], &[]),
        schema.clone(),
    );
    let reviews = subgraph(
        "reviews",
        &[("User", &["id", "reviews"], &[])],
        &[("Review", &["body"], &[])],
        metadata(&[FederationFieldConfiguration::key("User", "id")], &[], &[]),
        schema,
    );
    vec![users, reviews]
}

#[test]
fn entity_field_adds_a_dependent_fetch_with_injected_key() {
    let schema = reviews_schema();
    let mut doc = OperationDocument::new();
    let name = doc.add_field("name", None, None);
    let body = doc.add_field("body", None, None);
    let body_set = doc.add_selection_set(vec![Selection::Field(body)]);
    let reviews = doc.add_field("reviews", None, Some(body_set));
    let me_set = doc.add_selection_set(vec![Selection::Field(name), Selection::Field(reviews)]);
    let me = doc.add_field("me", None, Some(me_set));
    let root = doc.add_selection_set(vec![Selection::Field(me)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(users_and_reviews(), &schema, &mut doc);

    assert_eq!(plan.planners.len(), 2);
    let first = &plan.planners[0];
    assert_eq!(first.subgraph_id, "users");
    assert_eq!(
        paths_of(first),
        vec![
            "query",
            "query.me",
            "query.me.name",
            "query.me.id",
            "query.me.__typename",
        ]
    );
    let second = &plan.planners[1];
    assert_eq!(second.subgraph_id, "reviews");
    assert!(second.is_nested);
    assert_eq!(second.parent_path, "query.me");
    assert_eq!(second.depends_on_fetch_ids, vec![0]);
    assert_eq!(
        second.required_fields,
        vec![FederationFieldConfiguration::key("User", "id")]
    );
    assert_eq!(
        paths_of(second),
        vec!["query.me", "query.me.reviews", "query.me.reviews.body"]
    );

    // The injected key and __typename are fetched but hidden.
    assert_eq!(plan.skip_fields.len(), 2);
    for field in &plan.skip_fields {
        assert!(doc.is_skipped(*field));
    }
    let injected_id = doc.find_field(me_set, "id").unwrap();
    assert!(plan.skip_fields.contains(&injected_id));
    assert_eq!(plan.passes.selection, 2);
}

#[test]
fn pinned_key_fields_are_not_reselected_on_the_entity_subgraph() {
    // The injected User.id is pinned to the users subgraph on the second
    // pass; the unique reviews selection must not pull it along even though
    // the reviews subgraph serves id as a root node.
    let schema = reviews_schema();
    let mut doc = OperationDocument::new();
    let name = doc.add_field("name", None, None);
    let body = doc.add_field("body", None, None);
    let body_set = doc.add_selection_set(vec![Selection::Field(body)]);
    let reviews = doc.add_field("reviews", None, Some(body_set));
    let me_set = doc.add_selection_set(vec![Selection::Field(name), Selection::Field(reviews)]);
    let me = doc.add_field("me", None, Some(me_set));
    let root = doc.add_selection_set(vec![Selection::Field(me)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(users_and_reviews(), &schema, &mut doc);

    assert_eq!(plan.planners.len(), 2);
    let users_fetch = &plan.planners[0];
    let reviews_fetch = &plan.planners[1];
    // The key material is fetched exactly once, by the providing fetch.
    assert!(users_fetch.has_path("query.me.id"));
    assert!(users_fetch.has_path("query.me.__typename"));
    assert!(!reviews_fetch.has_path("query.me.id"));
    assert!(!reviews_fetch.has_path("query.me.__typename"));
    assert_eq!(
        reviews_fetch.required_fields,
        vec![FederationFieldConfiguration::key("User", "id")]
    );
}

#[test]
fn composite_key_injects_the_nested_selection() {
    let schema = SchemaDocument::builder()
        .object(
            "User",
            &[
                ("id", "ID"),
                ("name", "String"),
                ("info", "Info"),
                ("reviews", "[Review]"),
            ],
        )
        .object("Info", &[("age", "Int")])
        .object("Review", &[("body", "String")])
        .object("Query", &[("me", "User")])
        .build();
    let key = FederationFieldConfiguration::key("User", "id info { age }");
    let users = subgraph(
        "users",
        &[("Query", &["me"], &[])],
        &[("User", &["id", "name", "info"], &[]), ("Info", &["age"], &[])],
        metadata(&[key.clone()], &[], &[]),
        schema.clone(),
    );
    let reviews = subgraph(
        "reviews",
        &[("User", &["id", "info", "reviews"], &[])],
        &[("Info", &["age"], &[]), ("Review", &["body"], &[])],
        metadata(&[key.clone()], &[], &[]),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let name = doc.add_field("name", None, None);
    let body = doc.add_field("body", None, None);
    let body_set = doc.add_selection_set(vec![Selection::Field(body)]);
    let reviews_field = doc.add_field("reviews", None, Some(body_set));
    let me_set =
        doc.add_selection_set(vec![Selection::Field(name), Selection::Field(reviews_field)]);
    let me = doc.add_field("me", None, Some(me_set));
    let root = doc.add_selection_set(vec![Selection::Field(me)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![users, reviews], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 2);
    assert_eq!(plan.planners[1].required_fields, vec![key]);
    // id, info, info.age and __typename were synthesized under `me`.
    assert_eq!(plan.skip_fields.len(), 4);
    let info = doc.find_field(me_set, "info").unwrap();
    let info_set = doc.field(info).selection_set.unwrap();
    assert!(doc.find_field(info_set, "age").is_some());
    assert!(doc.is_skipped(info));
}

#[test]
fn requires_injects_the_dependency_and_a_representation_key() {
    let schema = SchemaDocument::builder()
        .object(
            "Product",
            &[("upc", "ID"), ("weight", "Int"), ("shippingEstimate", "Int")],
        )
        .object("Query", &[("products", "[Product]")])
        .build();
    let products = subgraph(
        "products",
        &[("Query", &["products"], &[])],
        &[("Product", &["upc", "weight"], &[])],
        metadata(
            &[FederationFieldConfiguration::key("Product", "upc")],
            &[],
            &[],
        ),
        schema.clone(),
    );
    let shipping = subgraph(
        "shipping",
        &[("Product", &["upc", "shippingEstimate"], &[])],
        &[],
        metadata(
            &[FederationFieldConfiguration::key("Product", "upc")],
            &[FederationFieldConfiguration::field(
                "Product",
                "shippingEstimate",
                "weight",
            )],
            &[],
        ),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let estimate = doc.add_field("shippingEstimate", None, None);
    let product_set = doc.add_selection_set(vec![Selection::Field(estimate)]);
    let products_field = doc.add_field("products", None, Some(product_set));
    let root = doc.add_selection_set(vec![Selection::Field(products_field)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![products, shipping], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 2);
    let entity_fetch = &plan.planners[1];
    assert_eq!(entity_fetch.subgraph_id, "shipping");
    assert_eq!(entity_fetch.depends_on_fetch_ids, vec![0]);
    // The fetch ships both the @requires selection and the key.
    assert_eq!(
        entity_fetch.required_fields,
        vec![
            FederationFieldConfiguration::field("Product", "shippingEstimate", "weight"),
            FederationFieldConfiguration::key("Product", "upc"),
        ]
    );
    // Entity fetch under a list field resolves per array item.
    assert_eq!(entity_fetch.path_type, PlannerPathType::ArrayItem);
    // weight, upc and __typename were injected and hidden.
    assert_eq!(plan.skip_fields.len(), 3);
    assert!(doc.find_field(product_set, "weight").is_some());
    assert!(doc.find_field(product_set, "upc").is_some());
}

#[test]
fn requires_survives_a_sibling_abstract_rewrite() {
    // Flattening `media` stops the pass with the shippingEstimate
    // requirements still pending; they must be injected by a later pass
    // instead of being dropped.
    let schema = SchemaDocument::builder()
        .interface("Media", &[("title", "String")])
        .object_with("Book", &["Media"], &[("title", "String")])
        .object_with("Magazine", &["Media"], &[("title", "String")])
        .object(
            "Product",
            &[
                ("upc", "ID"),
                ("weight", "Int"),
                ("shippingEstimate", "Int"),
                ("media", "Media"),
            ],
        )
        .object("Query", &[("product", "Product")])
        .build();
    // The products subgraph does not know Magazine implements Media.
    let products_schema = SchemaDocument::builder()
        .interface("Media", &[("title", "String")])
        .object_with("Book", &["Media"], &[("title", "String")])
        .object(
            "Product",
            &[("upc", "ID"), ("weight", "Int"), ("media", "Media")],
        )
        .object("Query", &[("product", "Product")])
        .build();
    let key = FederationFieldConfiguration::key("Product", "upc");
    let products = subgraph(
        "products",
        &[("Query", &["product"], &[])],
        &[
            ("Product", &["upc", "weight", "media"], &[]),
            ("Book", &["title"], &[]),
        ],
        metadata(&[key.clone()], &[], &[]),
        products_schema,
    );
    let shipping = subgraph(
        "shipping",
        &[("Product", &["upc", "shippingEstimate"], &[])],
        &[],
        metadata(
            &[key.clone()],
            &[FederationFieldConfiguration::field(
                "Product",
                "shippingEstimate",
                "weight",
            )],
            &[],
        ),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let estimate = doc.add_field("shippingEstimate", None, None);
    let title = doc.add_field("title", None, None);
    let media_set = doc.add_selection_set(vec![Selection::Field(title)]);
    let media = doc.add_field("media", None, Some(media_set));
    let product_set =
        doc.add_selection_set(vec![Selection::Field(estimate), Selection::Field(media)]);
    let product = doc.add_field("product", None, Some(product_set));
    let root = doc.add_selection_set(vec![Selection::Field(product)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![products, shipping], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 2);
    let shipping_fetch = &plan.planners[1];
    assert_eq!(shipping_fetch.subgraph_id, "shipping");
    assert!(shipping_fetch.is_nested);
    assert_eq!(shipping_fetch.depends_on_fetch_ids, vec![0]);
    assert_eq!(
        shipping_fetch.required_fields,
        vec![
            FederationFieldConfiguration::field("Product", "shippingEstimate", "weight"),
            key,
        ]
    );
    // weight, upc and __typename were still injected and hidden.
    assert_eq!(plan.skip_fields.len(), 3);
    assert!(doc.find_field(product_set, "weight").is_some());
    assert!(doc.find_field(product_set, "upc").is_some());
    // The interface selection was flattened onto the known member.
    assert!(plan.planners[0].has_path("query.product.media.$Book.title"));
    assert_eq!(plan.passes.selection, 3);
}

#[test]
fn chained_requires_across_three_subgraphs_converges() {
    let schema = SchemaDocument::builder()
        .object(
            "Thing",
            &[("id", "ID"), ("a", "String"), ("b", "String"), ("c", "String")],
        )
        .object("Query", &[("thing", "Thing")])
        .build();
    let key = FederationFieldConfiguration::key("Thing", "id");
    let alpha = subgraph(
        "alpha",
        &[("Query", &["thing"], &[])],
        &[("Thing", &["id", "a"], &[])],
        metadata(&[key.clone()], &[], &[]),
        schema.clone(),
    );
    let bravo = subgraph(
        "bravo",
        &[("Thing", &["id", "b"], &[])],
        &[],
        metadata(
            &[key.clone()],
            &[FederationFieldConfiguration::field("Thing", "b", "a")],
            &[],
        ),
        schema.clone(),
    );
    let charlie = subgraph(
        "charlie",
        &[("Thing", &["id", "c"], &[])],
        &[],
        metadata(
            &[key.clone()],
            &[FederationFieldConfiguration::field("Thing", "c", "b")],
            &[],
        ),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let c = doc.add_field("c", None, None);
    let thing_set = doc.add_selection_set(vec![Selection::Field(c)]);
    let thing = doc.add_field("thing", None, Some(thing_set));
    let root = doc.add_selection_set(vec![Selection::Field(thing)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![alpha, bravo, charlie], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 3);
    assert_eq!(plan.planners[0].subgraph_id, "alpha");
    assert_eq!(plan.planners[1].subgraph_id, "bravo");
    assert_eq!(plan.planners[2].subgraph_id, "charlie");
    assert_eq!(plan.planners[1].depends_on_fetch_ids, vec![0]);
    assert_eq!(
        plan.planners[1].required_fields,
        vec![
            FederationFieldConfiguration::field("Thing", "b", "a"),
            key.clone(),
        ]
    );
    assert_eq!(plan.planners[2].depends_on_fetch_ids, vec![0, 1]);
    assert_eq!(
        plan.planners[2].required_fields,
        vec![FederationFieldConfiguration::field("Thing", "c", "b"), key]
    );
    // b, a, id and __typename were synthesized over two injection passes.
    assert_eq!(plan.skip_fields.len(), 4);
    assert!(doc.find_field(thing_set, "a").is_some());
    assert!(doc.find_field(thing_set, "b").is_some());
    assert!(plan.passes.selection <= 5);
}

#[test]
fn entity_reachable_only_through_an_intermediate_subgraph() {
    let schema = SchemaDocument::builder()
        .object(
            "Entity",
            &[("id", "ID"), ("uuid", "ID"), ("remote", "String")],
        )
        .object("Query", &[("entity", "Entity")])
        .build();
    let id_key = FederationFieldConfiguration::key("Entity", "id");
    let uuid_key = FederationFieldConfiguration::key("Entity", "uuid");
    let alpha = subgraph(
        "alpha",
        &[("Query", &["entity"], &[])],
        &[("Entity", &["id"], &[])],
        metadata(&[id_key.clone()], &[], &[]),
        schema.clone(),
    );
    let bravo = subgraph(
        "bravo",
        &[("Entity", &["id", "uuid"], &[])],
        &[],
        metadata(&[id_key.clone(), uuid_key.clone()], &[], &[]),
        schema.clone(),
    );
    let charlie = subgraph(
        "charlie",
        &[("Entity", &["uuid", "remote"], &[])],
        &[],
        metadata(&[uuid_key.clone()], &[], &[]),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let remote = doc.add_field("remote", None, None);
    let entity_set = doc.add_selection_set(vec![Selection::Field(remote)]);
    let entity = doc.add_field("entity", None, Some(entity_set));
    let root = doc.add_selection_set(vec![Selection::Field(entity)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![alpha, bravo, charlie], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 3);
    assert_eq!(plan.planners[0].subgraph_id, "alpha");
    assert_eq!(plan.planners[1].subgraph_id, "bravo");
    assert_eq!(plan.planners[2].subgraph_id, "charlie");
    // The hop through bravo translates the id key into the uuid key.
    assert_eq!(plan.planners[1].depends_on_fetch_ids, vec![0]);
    assert_eq!(plan.planners[1].required_fields, vec![id_key]);
    assert_eq!(plan.planners[2].depends_on_fetch_ids, vec![1]);
    assert_eq!(plan.planners[2].required_fields, vec![uuid_key]);
    // id, __typename and uuid were synthesized.
    assert_eq!(plan.skip_fields.len(), 3);
    assert!(doc.find_field(entity_set, "uuid").is_some());
}

#[test]
fn entity_without_any_shared_key_is_unplannable() {
    let schema = SchemaDocument::builder()
        .object("Entity", &[("id", "ID"), ("uuid", "ID"), ("remote", "String")])
        .object("Query", &[("entity", "Entity")])
        .build();
    let alpha = subgraph(
        "alpha",
        &[("Query", &["entity"], &[])],
        &[("Entity", &["id"], &[])],
        metadata(&[FederationFieldConfiguration::key("Entity", "id")], &[], &[]),
        schema.clone(),
    );
    let bravo = subgraph(
        "bravo",
        &[("Entity", &["uuid", "remote"], &[])],
        &[],
        metadata(
            &[FederationFieldConfiguration::key("Entity", "uuid")],
            &[],
            &[],
        ),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let remote = doc.add_field("remote", None, None);
    let entity_set = doc.add_selection_set(vec![Selection::Field(remote)]);
    let entity = doc.add_field("entity", None, Some(entity_set));
    let root = doc.add_selection_set(vec![Selection::Field(entity)]);
    doc.add_operation(None, OperationKind::Query, root);

    let planner = Planner::new(vec![alpha, bravo], PlannerOptions::default()).unwrap();
    let report = planner.plan(&mut doc, &schema, None).unwrap_err();

    assert_eq!(
        report.errors(),
        &[PlanError::UnplannableField {
            type_name: "Entity".to_string(),
            field_name: "remote".to_string(),
            path: "query.entity.remote".to_string(),
        }]
    );
}

#[test]
fn external_field_without_a_provider_is_unplannable() {
    let schema = SchemaDocument::builder()
        .object("Product", &[("name", "String"), ("weight", "Int")])
        .object("Query", &[("product", "Product")])
        .build();
    let catalog = subgraph(
        "catalog",
        &[("Query", &["product"], &[])],
        &[("Product", &["name"], &["weight"])],
        FederationMetadata::default(),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let weight = doc.add_field("weight", None, None);
    let product_set = doc.add_selection_set(vec![Selection::Field(weight)]);
    let product = doc.add_field("product", None, Some(product_set));
    let root = doc.add_selection_set(vec![Selection::Field(product)]);
    doc.add_operation(None, OperationKind::Query, root);

    let planner = Planner::new(vec![catalog], PlannerOptions::default()).unwrap();
    let report = planner.plan(&mut doc, &schema, None).unwrap_err();

    assert_eq!(
        report.errors(),
        &[PlanError::UnplannableField {
            type_name: "Product".to_string(),
            field_name: "weight".to_string(),
            path: "query.product.weight".to_string(),
        }]
    );
}

#[test]
fn provided_field_stays_on_the_providing_subgraph() {
    let schema = SchemaDocument::builder()
        .object("User", &[("id", "ID"), ("name", "String")])
        .object("Review", &[("body", "String"), ("author", "User")])
        .object("Query", &[("reviews", "[Review]")])
        .build();
    let key = FederationFieldConfiguration::key("User", "id");
    let reviews = subgraph(
        "reviews",
        &[("Query", &["reviews"], &[])],
        &[
            ("Review", &["body", "author"], &[]),
            ("User", &["id"], &["name"]),
        ],
        metadata(
            &[key.clone()],
            &[],
            &[FederationFieldConfiguration::field("Review", "author", "name")],
        ),
        schema.clone(),
    );
    let users = subgraph(
        "users",
        &[("User", &["id"], &[])],
        &[("User", &["name"], &[])],
        metadata(&[key], &[], &[]),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let name = doc.add_field("name", None, None);
    let author_set = doc.add_selection_set(vec![Selection::Field(name)]);
    let author = doc.add_field("author", None, Some(author_set));
    let review_set = doc.add_selection_set(vec![Selection::Field(author)]);
    let reviews_field = doc.add_field("reviews", None, Some(review_set));
    let root = doc.add_selection_set(vec![Selection::Field(reviews_field)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![reviews, users], &schema, &mut doc);

    // @provides makes the otherwise external name local; one fetch suffices.
    assert_eq!(plan.planners.len(), 1);
    assert_eq!(plan.planners[0].subgraph_id, "reviews");
    assert!(plan.planners[0].has_path("query.reviews.author.name"));
    assert!(plan.skip_fields.is_empty());
    assert_eq!(plan.passes.selection, 1);
}

#[test]
fn interface_selection_is_flattened_for_a_partial_subgraph() {
    let schema = SchemaDocument::builder()
        .interface("Node", &[("id", "ID")])
        .object_with("User", &["Node"], &[("id", "ID"), ("name", "String")])
        .object_with("Product", &["Node"], &[("id", "ID")])
        .object("Query", &[("node", "Node")])
        .build();
    // The subgraph's own schema does not know Product implements Node.
    let subgraph_schema = SchemaDocument::builder()
        .interface("Node", &[("id", "ID")])
        .object_with("User", &["Node"], &[("id", "ID"), ("name", "String")])
        .object("Query", &[("node", "Node")])
        .build();
    let accounts = subgraph(
        "accounts",
        &[("Query", &["node"], &[])],
        &[("User", &["id", "name"], &[])],
        FederationMetadata::default(),
        subgraph_schema,
    );

    let mut doc = OperationDocument::new();
    let id = doc.add_field("id", None, None);
    let node_set = doc.add_selection_set(vec![Selection::Field(id)]);
    let node = doc.add_field("node", None, Some(node_set));
    let root = doc.add_selection_set(vec![Selection::Field(node)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![accounts], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 1);
    assert_eq!(
        paths_of(&plan.planners[0]),
        vec!["query", "query.node", "query.node.$User", "query.node.$User.id"]
    );
    // The selection was rewritten into a fragment on the known member.
    let rewritten_set = doc.field(node).selection_set.unwrap();
    let fragment = doc.find_fragment(rewritten_set, "User").unwrap();
    let inner = doc.fragment(fragment).selection_set;
    assert!(doc.find_field(inner, "id").is_some());
    assert!(plan.skip_fields.is_empty());
    assert_eq!(plan.passes.selection, 2);
}

#[test]
fn union_fragment_on_unknown_member_collapses_to_typename() {
    let schema = SchemaDocument::builder()
        .object("User", &[("name", "String")])
        .object("Product", &[("price", "Int")])
        .union("Search", &["User", "Product"])
        .object("Query", &[("search", "Search")])
        .build();
    let subgraph_schema = SchemaDocument::builder()
        .object("User", &[("name", "String")])
        .union("Search", &["User"])
        .object("Query", &[("search", "Search")])
        .build();
    let accounts = subgraph(
        "accounts",
        &[("Query", &["search"], &[])],
        &[("User", &["name"], &[])],
        FederationMetadata::default(),
        subgraph_schema,
    );

    let mut doc = OperationDocument::new();
    let price = doc.add_field("price", None, None);
    let product_set = doc.add_selection_set(vec![Selection::Field(price)]);
    let product_fragment = doc.add_inline_fragment("Product", product_set);
    let search_set = doc.add_selection_set(vec![Selection::InlineFragment(product_fragment)]);
    let search = doc.add_field("search", None, Some(search_set));
    let root = doc.add_selection_set(vec![Selection::Field(search)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![accounts], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 1);
    assert_eq!(
        paths_of(&plan.planners[0]),
        vec!["query", "query.search", "query.search.__typename"]
    );
    // Nothing of the fragment is resolvable here; only a hidden __typename
    // keeps the fetch valid.
    assert_eq!(plan.skip_fields.len(), 1);
    let selections = &doc.selection_set(doc.field(search).selection_set.unwrap()).selections;
    assert_eq!(selections.len(), 1);
}

#[test]
fn mutation_root_fetches_run_serially() {
    let schema = SchemaDocument::builder()
        .object("AddResult", &[("ok", "Boolean")])
        .object("UpdateResult", &[("ok", "Boolean")])
        .object("Mutation", &[("addUser", "AddResult"), ("updateUser", "UpdateResult")])
        .object("Query", &[])
        .mutation_type("Mutation")
        .build();
    let alpha = subgraph(
        "alpha",
        &[("Mutation", &["addUser"], &[])],
        &[("AddResult", &["ok"], &[])],
        FederationMetadata::default(),
        schema.clone(),
    );
    let bravo = subgraph(
        "bravo",
        &[("Mutation", &["updateUser"], &[])],
        &[("UpdateResult", &["ok"], &[])],
        FederationMetadata::default(),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let add_ok = doc.add_field("ok", None, None);
    let add_set = doc.add_selection_set(vec![Selection::Field(add_ok)]);
    let add = doc.add_field("addUser", None, Some(add_set));
    let update_ok = doc.add_field("ok", None, None);
    let update_set = doc.add_selection_set(vec![Selection::Field(update_ok)]);
    let update = doc.add_field("updateUser", None, Some(update_set));
    let root = doc.add_selection_set(vec![Selection::Field(add), Selection::Field(update)]);
    doc.add_operation(None, OperationKind::Mutation, root);

    let plan = plan(vec![alpha, bravo], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 2);
    assert_eq!(plan.planners[0].subgraph_id, "alpha");
    assert_eq!(plan.planners[1].subgraph_id, "bravo");
    assert!(plan.planners[0].depends_on_fetch_ids.is_empty());
    // The second mutation root waits for the first, in declaration order.
    assert_eq!(plan.planners[1].depends_on_fetch_ids, vec![0]);
    assert!(!plan.planners[1].is_nested);
    assert_eq!(plan.planners[1].parent_path, "mutation");
}

#[test]
fn mutually_dependent_requires_fail_as_non_convergence() {
    let schema = SchemaDocument::builder()
        .object("Thing", &[("id", "ID"), ("a", "String"), ("b", "String")])
        .object("Query", &[("thing", "Thing")])
        .build();
    let key = FederationFieldConfiguration::key("Thing", "id");
    let alpha = subgraph(
        "alpha",
        &[("Query", &["thing"], &[])],
        &[("Thing", &["id", "a"], &[])],
        metadata(
            &[key.clone()],
            &[FederationFieldConfiguration::field("Thing", "a", "b")],
            &[],
        ),
        schema.clone(),
    );
    let bravo = subgraph(
        "bravo",
        &[("Thing", &["id", "b"], &[])],
        &[],
        metadata(
            &[key],
            &[FederationFieldConfiguration::field("Thing", "b", "a")],
            &[],
        ),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let a = doc.add_field("a", None, None);
    let b = doc.add_field("b", None, None);
    let thing_set = doc.add_selection_set(vec![Selection::Field(a), Selection::Field(b)]);
    let thing = doc.add_field("thing", None, Some(thing_set));
    let root = doc.add_selection_set(vec![Selection::Field(thing)]);
    doc.add_operation(None, OperationKind::Query, root);

    let options = PlannerOptions {
        max_planning_passes: 5,
        ..PlannerOptions::default()
    };
    let planner = Planner::new(vec![alpha, bravo], options).unwrap();
    let report = planner.plan(&mut doc, &schema, None).unwrap_err();

    assert_eq!(report.errors().len(), 1);
    match &report.errors()[0] {
        PlanError::NonConvergence {
            waiting_on_dependencies,
            missing_paths,
            ..
        } => {
            assert!(waiting_on_dependencies);
            assert!(missing_paths.contains(&"query.thing.a".to_string()));
            assert!(missing_paths.contains(&"query.thing.b".to_string()));
        }
        other => panic!("expected a non-convergence error, got {other}"),
    }
}

#[test]
fn duplicate_subgraph_ids_are_rejected() {
    let schema = SchemaDocument::builder().object("Query", &[]).build();
    let make = || {
        subgraph(
            "users",
            &[],
            &[],
            FederationMetadata::default(),
            schema.clone(),
        )
    };
    let error = Planner::new(vec![make(), make()], PlannerOptions::default()).unwrap_err();
    assert!(matches!(error, PlanError::Internal { .. }));
}

#[rstest]
#[case(Some("Missing"), PlanError::UnknownOperation { name: Some("Missing".to_string()) })]
#[case(None, PlanError::OperationNameRequired)]
fn operation_resolution_errors(#[case] name: Option<&str>, #[case] expected: PlanError) {
    let schema = SchemaDocument::builder()
        .object("Query", &[("ping", "String")])
        .build();
    let pinger = subgraph(
        "pinger",
        &[("Query", &["ping"], &[])],
        &[],
        FederationMetadata::default(),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let ping = doc.add_field("ping", None, None);
    let first = doc.add_selection_set(vec![Selection::Field(ping)]);
    doc.add_operation(Some("First"), OperationKind::Query, first);
    let second = doc.add_selection_set(vec![]);
    doc.add_operation(Some("Second"), OperationKind::Query, second);

    let planner = Planner::new(vec![pinger], PlannerOptions::default()).unwrap();
    let report = planner.plan(&mut doc, &schema, name).unwrap_err();
    assert_eq!(report.errors(), &[expected]);
}

#[test]
fn fragment_paths_without_fields_beneath_are_pruned() {
    let schema = SchemaDocument::builder()
        .interface("Node", &[("id", "ID")])
        .object_with("User", &["Node"], &[("id", "ID")])
        .object_with("Product", &["Node"], &[("id", "ID")])
        .object("Query", &[("node", "Node")])
        .build();
    let accounts = subgraph(
        "accounts",
        &[("Query", &["node"], &[])],
        &[("Node", &["id"], &[]), ("User", &["id"], &[]), ("Product", &["id"], &[])],
        FederationMetadata::default(),
        schema.clone(),
    );

    let mut doc = OperationDocument::new();
    let id = doc.add_field("id", None, None);
    let user_set = doc.add_selection_set(vec![Selection::Field(id)]);
    let user_fragment = doc.add_inline_fragment("User", user_set);
    let empty_set = doc.add_selection_set(vec![]);
    let product_fragment = doc.add_inline_fragment("Product", empty_set);
    let node_set = doc.add_selection_set(vec![
        Selection::InlineFragment(user_fragment),
        Selection::InlineFragment(product_fragment),
    ]);
    let node = doc.add_field("node", None, Some(node_set));
    let root = doc.add_selection_set(vec![Selection::Field(node)]);
    doc.add_operation(None, OperationKind::Query, root);

    let plan = plan(vec![accounts], &schema, &mut doc);

    assert_eq!(plan.planners.len(), 1);
    let paths = paths_of(&plan.planners[0]);
    assert!(paths.contains(&"query.node.$User"));
    // No field ever landed under the Product fragment, so its scaffolding
    // path was dropped.
    assert!(!paths.contains(&"query.node.$Product"));
    assert!(paths.contains(&"query.node.$User.id"));
}
