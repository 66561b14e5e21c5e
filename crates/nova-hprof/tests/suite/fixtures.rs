use nova_hprof::{
    write_dump_to, BasicType, ClassInfo, DumpOptions, FieldInfo, HeapObject, HeapSnapshot,
    IdSize, PrimitiveArray, RedactionPolicy, RootKind, StaticValue, Value,
};

pub const OBJECT: u64 = 1;
pub const STRING: u64 = 2;
pub const USER: u64 = 3;
pub const ADMIN: u64 = 4;
pub const OBJECT_ARRAY: u64 = 5;

pub const ALICE_NAME: u64 = 100;
pub const ALICE_CHARS: u64 = 101;
pub const ALICE: u64 = 200;
pub const ALICE_PASSWORD: u64 = 201;
pub const ROOT_ADMIN: u64 = 300;
pub const USERS: u64 = 400;

/// Identifiers referenced by the heap but never defined in it.
pub const MISSING_NAME: u64 = 102;
pub const MISSING_ELEMENT: u64 = 999;
pub const MISSING_ROOT: u64 = 12345;

fn field(name: &str, ty: BasicType) -> FieldInfo {
    FieldInfo {
        name: name.to_string(),
        ty,
    }
}

fn chars(text: &str) -> PrimitiveArray {
    PrimitiveArray::Char(text.encode_utf16().collect())
}

/// A small application heap: users with names and passwords, an admin subclass, an object
/// array of users, and a few references to objects that do not exist.
pub fn app_heap(id_size: IdSize) -> HeapSnapshot {
    let mut heap = HeapSnapshot::new(id_size).with_timestamp(1_700_000_000_000);
    heap.add_class(ClassInfo {
        id: OBJECT,
        name: "java.lang.Object".into(),
        super_id: None,
        loader_id: 0,
        instance_fields: Vec::new(),
        static_fields: Vec::new(),
    })
    .add_class(ClassInfo {
        id: STRING,
        name: "java.lang.String".into(),
        super_id: Some(OBJECT),
        loader_id: 0,
        instance_fields: vec![field("value", BasicType::Object), field("hash", BasicType::Int)],
        static_fields: Vec::new(),
    })
    .add_class(ClassInfo {
        id: USER,
        name: "com.example.User".into(),
        super_id: Some(OBJECT),
        loader_id: 0,
        instance_fields: vec![
            field("name", BasicType::Object),
            field("age", BasicType::Int),
            field("password", BasicType::Object),
            field("pin", BasicType::Long),
            field("active", BasicType::Boolean),
        ],
        static_fields: vec![StaticValue {
            name: "SECRET_KEY".into(),
            value: Value::Long(42),
        }],
    })
    .add_class(ClassInfo {
        id: ADMIN,
        name: "com.example.Admin".into(),
        super_id: Some(USER),
        loader_id: 0,
        instance_fields: vec![field("level", BasicType::Short)],
        static_fields: Vec::new(),
    })
    .add_class(ClassInfo {
        id: OBJECT_ARRAY,
        name: "java.lang.Object[]".into(),
        super_id: Some(OBJECT),
        loader_id: 0,
        instance_fields: Vec::new(),
        static_fields: Vec::new(),
    })
    .add_object(
        ALICE_NAME,
        HeapObject::Instance {
            class_id: STRING,
            fields: vec![Value::Object(ALICE_CHARS), Value::Int(92_903_040)],
        },
    )
    .add_object(
        ALICE_CHARS,
        HeapObject::PrimitiveArray {
            values: chars("alice"),
        },
    )
    .add_object(
        ALICE,
        HeapObject::Instance {
            class_id: USER,
            fields: vec![
                Value::Object(ALICE_NAME),
                Value::Int(33),
                Value::Object(ALICE_PASSWORD),
                Value::Long(1234),
                Value::Boolean(true),
            ],
        },
    )
    .add_object(
        ALICE_PASSWORD,
        HeapObject::PrimitiveArray {
            values: chars("hunter2"),
        },
    )
    .add_object(
        ROOT_ADMIN,
        HeapObject::Instance {
            class_id: ADMIN,
            fields: vec![
                Value::Short(7),
                Value::Object(MISSING_NAME),
                Value::Int(40),
                Value::Object(0),
                Value::Long(9),
                Value::Boolean(false),
            ],
        },
    )
    .add_object(
        USERS,
        HeapObject::ObjectArray {
            class_id: OBJECT_ARRAY,
            elements: vec![ALICE, ROOT_ADMIN, MISSING_ELEMENT],
        },
    )
    .add_root(RootKind::JniGlobal, USERS)
    .add_root(
        RootKind::ThreadObject {
            thread_serial: 1,
            stack_serial: 1,
        },
        ALICE,
    )
    .add_root(RootKind::StickyClass, USER)
    .add_root(RootKind::Unknown, MISSING_ROOT);
    heap
}

pub fn dump_bytes(heap: &HeapSnapshot, policy: Option<&RedactionPolicy>) -> Vec<u8> {
    let mut out = Vec::new();
    write_dump_to(heap, &mut out, policy, DumpOptions::default()).expect("dump succeeds");
    out
}
