use std::sync::Arc;

use entrack_core::{
    DeleteBehavior, EntityState, EntityTypeId, InstanceId, KeyId, Model, ModelBuilder, NavigationId,
    PropertyId, StateManager, TrackerOptions, Value, ValueGenerated, ValueKind,
};

/// Blog 1-* Post, optional by default
#[allow(dead_code)]
pub struct BlogModel {
    pub model: Arc<Model>,
    pub blog: EntityTypeId,
    pub post: EntityTypeId,
    pub blog_id: PropertyId,
    pub blog_name: PropertyId,
    pub blog_pk: KeyId,
    pub post_id: PropertyId,
    pub post_title: PropertyId,
    pub post_blog_id: PropertyId,
    pub posts: NavigationId,
    pub post_blog: NavigationId,
}

/// Build the blog model with the given delete behavior; `required` makes
/// `Post.BlogId` non-nullable
#[allow(dead_code)]
pub fn blog_model(behavior: DeleteBehavior, required: bool) -> BlogModel {
    let mut b = ModelBuilder::new();
    let blog = b.entity("Blog");
    let blog_id = b
        .property(blog, "Id", ValueKind::Int)
        .value_generated(ValueGenerated::OnAdd)
        .build();
    let blog_name = b.property(blog, "Name", ValueKind::Text).nullable().build();
    let blog_pk = b.primary_key(blog, &[blog_id]);

    let post = b.entity("Post");
    let post_id = b
        .property(post, "Id", ValueKind::Int)
        .value_generated(ValueGenerated::OnAdd)
        .build();
    let post_title = b.property(post, "Title", ValueKind::Text).nullable().build();
    let fk = b.property(post, "BlogId", ValueKind::Int);
    let post_blog_id = if required { fk.build() } else { fk.nullable().build() };
    b.primary_key(post, &[post_id]);
    b.relationship(post, &[post_blog_id], blog_pk)
        .required(required)
        .on_delete(behavior)
        .with_principal_navigation("Blog")
        .with_dependents_navigation("Posts")
        .build();

    let model = Arc::new(b.finish().expect("blog model is valid"));
    let posts = model.find_navigation(blog, "Posts").expect("Posts");
    let post_blog = model.find_navigation(post, "Blog").expect("Blog");
    BlogModel {
        model,
        blog,
        post,
        blog_id,
        blog_name,
        blog_pk,
        post_id,
        post_title,
        post_blog_id,
        posts,
        post_blog,
    }
}

/// Person 1-1 Passport, the passport holding the foreign key
#[allow(dead_code)]
pub struct PassportModel {
    pub model: Arc<Model>,
    pub person: EntityTypeId,
    pub passport: EntityTypeId,
    pub person_id: PropertyId,
    pub passport_id: PropertyId,
    pub passport_person_id: PropertyId,
    pub person_passport: NavigationId,
    pub passport_person: NavigationId,
}

#[allow(dead_code)]
pub fn passport_model() -> PassportModel {
    let mut b = ModelBuilder::new();
    let person = b.entity("Person");
    let person_id = b.property(person, "Id", ValueKind::Int).build();
    let person_pk = b.primary_key(person, &[person_id]);

    let passport = b.entity("Passport");
    let passport_id = b.property(passport, "Id", ValueKind::Int).build();
    let passport_person_id = b
        .property(passport, "PersonId", ValueKind::Int)
        .nullable()
        .build();
    b.primary_key(passport, &[passport_id]);
    b.relationship(passport, &[passport_person_id], person_pk)
        .unique()
        .with_principal_navigation("Person")
        .with_dependents_navigation("Passport")
        .build();

    let model = Arc::new(b.finish().expect("passport model is valid"));
    let person_passport = model.find_navigation(person, "Passport").expect("Passport");
    let passport_person = model.find_navigation(passport, "Person").expect("Person");
    PassportModel {
        model,
        person,
        passport,
        person_id,
        passport_id,
        passport_person_id,
        person_passport,
        passport_person,
    }
}

/// Order keyed by (Number, Region) with lines pointing at both columns
#[allow(dead_code)]
pub struct OrderModel {
    pub model: Arc<Model>,
    pub order: EntityTypeId,
    pub line: EntityTypeId,
    pub order_number: PropertyId,
    pub order_region: PropertyId,
    pub order_pk: KeyId,
    pub line_id: PropertyId,
    pub line_order_number: PropertyId,
    pub line_order_region: PropertyId,
    pub lines: NavigationId,
    pub line_order: NavigationId,
}

#[allow(dead_code)]
pub fn order_model() -> OrderModel {
    let mut b = ModelBuilder::new();
    let order = b.entity("Order");
    let order_number = b.property(order, "Number", ValueKind::Int).build();
    let order_region = b.property(order, "Region", ValueKind::Text).build();
    let order_pk = b.primary_key(order, &[order_number, order_region]);

    let line = b.entity("OrderLine");
    let line_id = b.property(line, "Id", ValueKind::Int).build();
    let line_order_number = b
        .property(line, "OrderNumber", ValueKind::Int)
        .nullable()
        .build();
    let line_order_region = b
        .property(line, "OrderRegion", ValueKind::Text)
        .nullable()
        .build();
    b.primary_key(line, &[line_id]);
    b.relationship(line, &[line_order_number, line_order_region], order_pk)
        .with_principal_navigation("Order")
        .with_dependents_navigation("Lines")
        .build();

    let model = Arc::new(b.finish().expect("order model is valid"));
    let lines = model.find_navigation(order, "Lines").expect("Lines");
    let line_order = model.find_navigation(line, "Order").expect("Order");
    OrderModel {
        model,
        order,
        line,
        order_number,
        order_region,
        order_pk,
        line_id,
        line_order_number,
        line_order_region,
        lines,
        line_order,
    }
}

#[allow(dead_code)]
pub fn new_tracker(model: &Arc<Model>) -> StateManager {
    StateManager::new(Arc::clone(model))
}

#[allow(dead_code)]
pub fn new_tracker_with(model: &Arc<Model>, options: TrackerOptions) -> StateManager {
    StateManager::with_options(Arc::clone(model), options)
}

/// Create an instance, assign `values` as application code would, and move
/// it into `state`
#[allow(dead_code)]
pub fn track(
    sm: &mut StateManager,
    entity_type: EntityTypeId,
    values: &[(PropertyId, Value)],
    state: EntityState,
) -> InstanceId {
    let id = sm.create_instance(entity_type).expect("known entity type");
    for (property, value) in values {
        sm.write_property(id, *property, value.clone())
            .expect("detached write");
    }
    sm.set_entity_state(id, state).expect("state change");
    id
}

/// Blog {Id: `id`} as Unchanged
#[allow(dead_code)]
pub fn unchanged_blog(sm: &mut StateManager, m: &BlogModel, id: i64) -> InstanceId {
    track(sm, m.blog, &[(m.blog_id, Value::Int(id))], EntityState::Unchanged)
}

/// Post {Id: `id`, BlogId: `blog_id`} as Unchanged
#[allow(dead_code)]
pub fn unchanged_post(sm: &mut StateManager, m: &BlogModel, id: i64, blog_id: Option<i64>) -> InstanceId {
    let fk = blog_id.map(Value::Int).unwrap_or(Value::Null);
    track(
        sm,
        m.post,
        &[(m.post_id, Value::Int(id)), (m.post_blog_id, fk)],
        EntityState::Unchanged,
    )
}
